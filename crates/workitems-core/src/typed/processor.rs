//! Processor trait - runs one kind of work item.
//!
//! Two layers, same as the registry needs them:
//! - **typed**: `Processor<T>`, what applications implement
//! - **erased**: `DynProcessor` / `PreparedWorkItem`, object-safe, stored in
//!   the registry and driven by the scope
//!
//! `TypedProcessor<T, P>` bridges the two by decoding the JSON payload into
//! `T` before anything else happens.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::WorkItem;
use crate::error::ProcessingError;

/// Handles work items of type `T`.
///
/// ```ignore
/// struct SubscriptionTriggerProcessor;
///
/// #[async_trait]
/// impl Processor<SubscriptionTrigger> for SubscriptionTriggerProcessor {
///     async fn process(
///         &self,
///         item: SubscriptionTrigger,
///         _cancel: &CancellationToken,
///     ) -> Result<bool, ProcessingError> {
///         trigger(&item.subscription_id).await?;
///         Ok(true)
///     }
///
///     fn mutex_key(&self, item: &SubscriptionTrigger) -> Option<String> {
///         Some(format!("Subscription_{}", item.subscription_id))
///     }
/// }
/// ```
#[async_trait]
pub trait Processor<T: WorkItem>: Send + Sync {
    /// `Ok(false)` means "handled, but report it as unsuccessful"; the
    /// message is still acknowledged. Return an error to get a redelivery.
    async fn process(&self, item: T, cancel: &CancellationToken) -> Result<bool, ProcessingError>;

    /// Items sharing a key never run concurrently, on any replica.
    fn mutex_key(&self, _item: &T) -> Option<String> {
        None
    }

    /// Extra text attached to the processing span.
    fn logging_context(&self, _item: &T) -> Option<String> {
        None
    }
}

/// Object-safe processor. Decodes a payload into a runnable unit.
pub trait DynProcessor: Send + Sync {
    fn work_item_type(&self) -> &'static str;

    fn prepare(
        self: Arc<Self>,
        payload: Value,
    ) -> Result<Box<dyn PreparedWorkItem>, ProcessingError>;
}

/// A decoded work item bound to its processor, ready to run once.
#[async_trait]
pub trait PreparedWorkItem: Send {
    fn mutex_key(&self) -> Option<&str>;

    fn logging_context(&self) -> Option<&str>;

    async fn execute(
        self: Box<Self>,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessingError>;
}

pub struct TypedProcessor<T: WorkItem, P: Processor<T>> {
    processor: P,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WorkItem, P: Processor<T>> TypedProcessor<T, P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            _marker: PhantomData,
        }
    }
}

impl<T, P> DynProcessor for TypedProcessor<T, P>
where
    T: WorkItem,
    P: Processor<T> + 'static,
{
    fn work_item_type(&self) -> &'static str {
        T::TYPE
    }

    fn prepare(
        self: Arc<Self>,
        payload: Value,
    ) -> Result<Box<dyn PreparedWorkItem>, ProcessingError> {
        let item: T =
            serde_json::from_value(payload).map_err(|source| ProcessingError::Deserialize {
                work_item_type: T::TYPE.to_string(),
                source,
            })?;

        let mutex_key = self.processor.mutex_key(&item);
        let logging_context = self.processor.logging_context(&item);

        Ok(Box::new(Prepared {
            owner: self,
            item,
            mutex_key,
            logging_context,
        }))
    }
}

struct Prepared<T: WorkItem, P: Processor<T>> {
    owner: Arc<TypedProcessor<T, P>>,
    item: T,
    mutex_key: Option<String>,
    logging_context: Option<String>,
}

#[async_trait]
impl<T, P> PreparedWorkItem for Prepared<T, P>
where
    T: WorkItem,
    P: Processor<T> + 'static,
{
    fn mutex_key(&self) -> Option<&str> {
        self.mutex_key.as_deref()
    }

    fn logging_context(&self) -> Option<&str> {
        self.logging_context.as_deref()
    }

    async fn execute(
        self: Box<Self>,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessingError> {
        let Prepared { owner, item, .. } = *self;
        owner.processor.process(item, cancel).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Work items and processors shared by the engine's tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Greeting {
        pub name: String,
    }

    impl WorkItem for Greeting {
        const TYPE: &'static str = "Greeting";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SubscriptionTrigger {
        pub subscription_id: String,
    }

    impl WorkItem for SubscriptionTrigger {
        const TYPE: &'static str = "SubscriptionTrigger";
    }

    /// Counts calls and returns a fixed verdict.
    #[derive(Default)]
    pub struct CountingProcessor {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl CountingProcessor {
        pub fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl<T: WorkItem> Processor<T> for Arc<CountingProcessor> {
        async fn process(&self, _item: T, _cancel: &CancellationToken) -> Result<bool, ProcessingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow::anyhow!("downstream unavailable").into());
            }
            Ok(true)
        }
    }
}
