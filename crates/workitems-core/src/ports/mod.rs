//! Ports - the external collaborators the engine talks to.
//!
//! Which queue, cache or compute provider backs these is deployment wiring
//! and lives outside this crate. `crate::impls` has in-memory versions.

pub mod clock;
pub mod queue;
pub mod replicas;
pub mod store;
pub mod telemetry;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::queue::{QueueError, QueueMessage, SendReceipt, WorkItemQueue};
pub use self::replicas::{ReplicaResolveError, ReplicaResolver};
pub use self::store::{JsonCache, StateStore, StoreError};
pub use self::telemetry::{
    NoTelemetryRecorder, TelemetryRecorder, TelemetryScope, TracingTelemetryRecorder,
};
