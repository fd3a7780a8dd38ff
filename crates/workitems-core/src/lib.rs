//! workitems-core
//!
//! Queue-backed work item engine: typed payloads dispatched to registered
//! processors, per-key mutual exclusion across replicas, drainable replica
//! state and cancellable reminders.
//!
//! # Modules
//! - **domain**: work items, the wire envelope, queue ids, replica state
//! - **ports**: queue, store, telemetry, replica and clock abstractions
//! - **typed**: `Processor<T>` and the processor registry
//! - **app**: builder/host, producer, scopes, consumers, reminders, fleet
//! - **impls**: in-memory ports for development and tests
//! - **config**: consumer options
//! - **observability**: tracing setup and consumer counters

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use app::{WorkItemHost, WorkItemsBuilder};
pub use error::ProcessingError;
