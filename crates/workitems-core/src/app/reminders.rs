//! Reminders - cancellable delayed work items.
//!
//! A reminder is a delayed message plus its receipt stored under
//! `Reminder_{Type}_{key}`. Holding the receipt is what makes it possible
//! to delete the message before it fires.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::producer::{ProduceError, WorkItemProducer};
use crate::domain::{MessageId, PopReceipt, WorkItem};
use crate::ports::{JsonCache, QueueError, SendReceipt, StateStore, StoreError};

/// Kept past the due time so a late-firing reminder can still be matched.
pub const REMINDER_GRACE: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error(transparent)]
    Produce(#[from] ProduceError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderReceipt {
    pub pop_receipt: PopReceipt,
    pub message_id: MessageId,
}

impl From<SendReceipt> for ReminderReceipt {
    fn from(receipt: SendReceipt) -> Self {
        Self {
            pop_receipt: receipt.pop_receipt,
            message_id: receipt.message_id,
        }
    }
}

pub fn reminder_key<T: WorkItem>(key: &str) -> String {
    format!("Reminder_{}_{key}", T::TYPE)
}

/// One reminder slot: at most one pending reminder of type `T` per `key`.
pub struct ReminderManager<T: WorkItem> {
    producer: WorkItemProducer<T>,
    receipt: JsonCache<ReminderReceipt>,
}

impl<T: WorkItem> ReminderManager<T> {
    pub fn new(producer: WorkItemProducer<T>, store: Arc<dyn StateStore>, key: &str) -> Self {
        Self {
            producer,
            receipt: JsonCache::new(store, reminder_key::<T>(key)),
        }
    }

    /// Schedule `item` to be processed after `due_time`.
    ///
    /// Setting a reminder again overwrites the stored receipt; the earlier
    /// message is not deleted and will still fire.
    pub async fn set_reminder(&self, item: &T, due_time: Duration) -> Result<(), ReminderError> {
        let sent = self.producer.produce_delayed(item, due_time).await?;
        self.receipt
            .set(
                &ReminderReceipt::from(sent),
                due_time.saturating_add(REMINDER_GRACE),
            )
            .await?;
        info!(
            reminder = %self.receipt.key(),
            message_id = %sent.message_id,
            due_secs = due_time.as_secs(),
            "reminder set"
        );
        Ok(())
    }

    /// Cancel the pending reminder, if there is one. Returns whether a
    /// receipt was found.
    pub async fn unset_reminder(&self) -> Result<bool, ReminderError> {
        let Some(receipt) = self.receipt.get().await? else {
            debug!(reminder = %self.receipt.key(), "no reminder to unset");
            return Ok(false);
        };

        match self
            .producer
            .delete_work_item(receipt.message_id, receipt.pop_receipt)
            .await
        {
            Ok(()) => {}
            // Already received by a consumer: too late to cancel.
            Err(QueueError::MessageNotFound { .. }) => {
                debug!(
                    reminder = %self.receipt.key(),
                    message_id = %receipt.message_id,
                    "reminder message already gone"
                );
            }
            Err(err) => return Err(err.into()),
        }

        self.receipt.clear().await?;
        info!(reminder = %self.receipt.key(), "reminder unset");
        Ok(true)
    }

    /// Called by the processor of the reminder once it fires.
    pub async fn reminder_received(&self) -> Result<(), ReminderError> {
        self.receipt.clear().await?;
        Ok(())
    }

    pub async fn receipt(&self) -> Result<Option<ReminderReceipt>, ReminderError> {
        Ok(self.receipt.get().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryQueue, InMemoryStore};
    use crate::ports::WorkItemQueue;
    use crate::typed::processor::testing::SubscriptionTrigger;

    const DUE: Duration = Duration::from_secs(300);

    struct Harness {
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryStore>,
        reminders: ReminderManager<SubscriptionTrigger>,
    }

    fn harness() -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryStore::new());
        let reminders = ReminderManager::new(
            WorkItemProducer::new(queue.clone()),
            store.clone(),
            "sub-1",
        );
        Harness {
            queue,
            store,
            reminders,
        }
    }

    fn item() -> SubscriptionTrigger {
        SubscriptionTrigger {
            subscription_id: "sub-1".into(),
        }
    }

    #[test]
    fn key_includes_type_and_key() {
        assert_eq!(
            reminder_key::<SubscriptionTrigger>("sub-1"),
            "Reminder_SubscriptionTrigger_sub-1"
        );
    }

    #[tokio::test]
    async fn set_reminder_sends_delayed_message_and_stores_receipt() {
        let h = harness();
        h.reminders.set_reminder(&item(), DUE).await.unwrap();

        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.queue.visible_len().await, 0);

        let receipt = h.reminders.receipt().await.unwrap().unwrap();
        assert!(h.queue.dequeue_count(receipt.message_id).await.is_some());

        let ttl = h.store.ttl("Reminder_SubscriptionTrigger_sub-1").await.unwrap();
        assert!(ttl > DUE + REMINDER_GRACE - Duration::from_secs(5));
        assert!(ttl <= DUE + REMINDER_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn unset_reminder_prevents_delivery() {
        let h = harness();
        h.reminders.set_reminder(&item(), DUE).await.unwrap();

        assert!(h.reminders.unset_reminder().await.unwrap());
        assert!(h.reminders.receipt().await.unwrap().is_none());

        tokio::time::advance(DUE + Duration::from_secs(1)).await;
        assert!(
            h.queue
                .receive_message(Duration::from_secs(30))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unset_without_reminder_is_a_no_op() {
        let h = harness();
        assert!(!h.reminders.unset_reminder().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unset_after_delivery_only_clears_the_receipt() {
        let h = harness();
        h.reminders.set_reminder(&item(), DUE).await.unwrap();

        tokio::time::advance(DUE + Duration::from_secs(1)).await;
        let fired = h
            .queue
            .receive_message(Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(h.reminders.unset_reminder().await.unwrap());
        assert!(h.reminders.receipt().await.unwrap().is_none());
        assert_eq!(h.queue.dequeue_count(fired.message_id).await, Some(1));
    }

    #[tokio::test]
    async fn far_future_reminder_can_still_be_unset() {
        let h = harness();
        h.reminders
            .set_reminder(&item(), Duration::from_secs(u64::MAX / 2))
            .await
            .unwrap();
        assert_eq!(h.queue.visible_len().await, 0);

        assert!(h.reminders.unset_reminder().await.unwrap());
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn reminder_received_clears_receipt() {
        let h = harness();
        h.reminders.set_reminder(&item(), DUE).await.unwrap();

        h.reminders.reminder_received().await.unwrap();

        assert!(h.reminders.receipt().await.unwrap().is_none());
        assert_eq!(h.queue.len().await, 1);
    }
}
