//! Impls - in-memory port implementations for development and tests.
//!
//! Production backends (cloud queue, shared cache, orchestrator API) live in
//! separate crates and plug in through `crate::ports`.

pub mod memory_queue;
pub mod memory_store;
pub mod static_replicas;

pub use self::memory_queue::InMemoryQueue;
pub use self::memory_store::InMemoryStore;
pub use self::static_replicas::StaticReplicaResolver;
