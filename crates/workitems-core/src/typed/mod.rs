//! Typed - typed work item processing API.
//!
//! - **typed surface**: `Processor<T>` keyed by `WorkItem::TYPE`
//! - **erased core**: `DynProcessor` / `PreparedWorkItem`, object-safe
//!
//! The registry maps discriminators to decode-and-construct closures, so no
//! runtime type lookup by name is ever needed.

pub mod processor;
pub mod registry;

pub use self::processor::{DynProcessor, PreparedWorkItem, Processor, TypedProcessor};
pub use self::registry::{ProcessorRegistry, Registration, RegistryError};
