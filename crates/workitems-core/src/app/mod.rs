//! App - the engine, built from ports.
//!
//! - **WorkItemsBuilder / WorkItemHost**: wiring and lifecycle
//! - **WorkItemProducer**: typed send side
//! - **ScopeManager**: state gating, in-flight accounting, dispatch, mutex
//! - **WorkItemConsumer / ConsumerGroup**: receive loop and ack decisions
//! - **ReminderManager**: cancellable delayed work items
//! - **FleetProcessingState**: processing state across replicas

pub mod builder;
pub mod consumer;
pub mod consumer_group;
pub mod fleet;
pub mod processing_state;
pub mod producer;
pub mod reminders;
pub mod retry;
pub mod scope;

pub use self::builder::{BuildError, WorkItemHost, WorkItemsBuilder};
pub use self::consumer::{ConsumeOutcome, WorkItemConsumer};
pub use self::consumer_group::ConsumerGroup;
pub use self::fleet::{FleetError, FleetProcessingState};
pub use self::processing_state::ReplicaProcessingState;
pub use self::producer::{ProduceError, WorkItemProducer, WorkItemProducerFactory};
pub use self::reminders::{ReminderError, ReminderManager, ReminderReceipt};
pub use self::retry::RetryPolicy;
pub use self::scope::{ScopeManager, WorkItemScope};
