//! Domain model: work items, the wire envelope, queue ids and replica state.

pub mod envelope;
pub mod ids;
pub mod state;
pub mod work_item;

pub use envelope::WorkItemEnvelope;
pub use ids::{MessageId, PopReceipt};
pub use state::ProcessingState;
pub use work_item::WorkItem;
