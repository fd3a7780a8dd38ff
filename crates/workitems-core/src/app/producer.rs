//! WorkItemProducer - sends typed work items to a queue.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{MessageId, PopReceipt, WorkItem, WorkItemEnvelope};
use crate::ports::{QueueError, SendReceipt, WorkItemQueue};

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("failed to serialize work item of type {work_item_type}: {source}")]
    Serialize {
        work_item_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Producer for one work item type. Cheap to clone.
///
/// No idempotency: producing the same payload twice enqueues two messages.
pub struct WorkItemProducer<T: WorkItem> {
    queue: Arc<dyn WorkItemQueue>,
    _marker: PhantomData<fn(T)>,
}

impl<T: WorkItem> Clone for WorkItemProducer<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            _marker: PhantomData,
        }
    }
}

impl<T: WorkItem> WorkItemProducer<T> {
    pub fn new(queue: Arc<dyn WorkItemQueue>) -> Self {
        Self {
            queue,
            _marker: PhantomData,
        }
    }

    /// Enqueue `item`, visible immediately.
    pub async fn produce(&self, item: &T) -> Result<SendReceipt, ProduceError> {
        let body = Self::body(item, None)?;
        let receipt = self.queue.send_message(body, None).await?;
        debug!(
            work_item_type = T::TYPE,
            message_id = %receipt.message_id,
            "work item produced"
        );
        Ok(receipt)
    }

    /// Enqueue `item`, invisible for `delay`. The envelope records the delay
    /// in whole seconds for latency telemetry.
    pub async fn produce_delayed(
        &self,
        item: &T,
        delay: Duration,
    ) -> Result<SendReceipt, ProduceError> {
        let body = Self::body(item, Some(delay.as_secs()))?;
        let receipt = self.queue.send_message(body, Some(delay)).await?;
        debug!(
            work_item_type = T::TYPE,
            message_id = %receipt.message_id,
            delay_secs = delay.as_secs(),
            "delayed work item produced"
        );
        Ok(receipt)
    }

    /// Remove a message that has not been received yet.
    pub async fn delete_work_item(
        &self,
        message_id: MessageId,
        pop_receipt: PopReceipt,
    ) -> Result<(), QueueError> {
        self.queue.delete_message(message_id, pop_receipt).await
    }

    fn body(item: &T, delay: Option<u64>) -> Result<String, ProduceError> {
        WorkItemEnvelope::wrap(item, delay)
            .and_then(|envelope| envelope.to_body())
            .map_err(|source| ProduceError::Serialize {
                work_item_type: T::TYPE,
                source,
            })
    }
}

/// Hands out producers bound to the default queue, or to a dedicated queue
/// for the work item types that have one.
#[derive(Clone)]
pub struct WorkItemProducerFactory {
    default_queue: Arc<dyn WorkItemQueue>,
    overrides: HashMap<&'static str, Arc<dyn WorkItemQueue>>,
}

impl WorkItemProducerFactory {
    pub fn new(default_queue: Arc<dyn WorkItemQueue>) -> Self {
        Self {
            default_queue,
            overrides: HashMap::new(),
        }
    }

    /// Route work items of type `T` to `queue`.
    pub fn with_queue_for<T: WorkItem>(mut self, queue: Arc<dyn WorkItemQueue>) -> Self {
        self.overrides.insert(T::TYPE, queue);
        self
    }

    pub fn create_producer<T: WorkItem>(&self) -> WorkItemProducer<T> {
        let queue = self
            .overrides
            .get(T::TYPE)
            .unwrap_or(&self.default_queue);
        WorkItemProducer::new(Arc::clone(queue))
    }
}
