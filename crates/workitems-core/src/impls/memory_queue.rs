//! InMemoryQueue - process-local WorkItemQueue for development and tests.
//!
//! Models the lease semantics of a cloud storage queue: delayed visibility
//! on send, an invisibility window on receive, a dequeue count and pop
//! receipts that are reissued on every receive.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{MessageId, PopReceipt};
use crate::ports::{Clock, QueueError, QueueMessage, SendReceipt, SystemClock, WorkItemQueue};

/// Stand-in for "never" when a delay does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct StoredMessage {
    body: String,
    pop_receipt: PopReceipt,
    dequeue_count: u32,
    visible_at: Instant,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct InMemoryQueueState {
    messages: HashMap<MessageId, StoredMessage>,
    /// Send order; receive scans it for the first visible message.
    order: VecDeque<MessageId>,
}

pub struct InMemoryQueue {
    state: Arc<Mutex<InMemoryQueueState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryQueueState::default())),
            clock,
        }
    }

    /// Messages not yet deleted, visible or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages that a receive could return right now.
    pub async fn visible_len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().await;
        state
            .messages
            .values()
            .filter(|message| message.visible_at <= now)
            .count()
    }

    pub async fn dequeue_count(&self, message_id: MessageId) -> Option<u32> {
        let state = self.state.lock().await;
        state
            .messages
            .get(&message_id)
            .map(|message| message.dequeue_count)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkItemQueue for InMemoryQueue {
    async fn send_message(
        &self,
        body: String,
        visibility_delay: Option<Duration>,
    ) -> Result<SendReceipt, QueueError> {
        let message_id = MessageId::new();
        let pop_receipt = PopReceipt::new();
        let visible_at = deadline(Instant::now(), visibility_delay.unwrap_or_default());

        let mut state = self.state.lock().await;
        state.messages.insert(
            message_id,
            StoredMessage {
                body,
                pop_receipt,
                dequeue_count: 0,
                visible_at,
                inserted_at: self.clock.now(),
            },
        );
        state.order.push_back(message_id);

        Ok(SendReceipt {
            message_id,
            pop_receipt,
        })
    }

    async fn receive_message(
        &self,
        invisibility: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let InMemoryQueueState { messages, order } = &mut *state;

        // Deleted ids are dropped lazily from the order list.
        order.retain(|id| messages.contains_key(id));

        let Some(message_id) = order
            .iter()
            .copied()
            .find(|id| messages.get(id).is_some_and(|m| m.visible_at <= now))
        else {
            return Ok(None);
        };

        let Some(stored) = messages.get_mut(&message_id) else {
            return Ok(None);
        };
        stored.pop_receipt = PopReceipt::new();
        stored.dequeue_count += 1;
        stored.visible_at = deadline(now, invisibility);

        // Move to the back so redeliveries queue up behind fresh messages.
        order.retain(|id| *id != message_id);
        order.push_back(message_id);

        Ok(Some(QueueMessage {
            message_id,
            pop_receipt: stored.pop_receipt,
            body: stored.body.clone(),
            dequeue_count: stored.dequeue_count,
            inserted_at: stored.inserted_at,
        }))
    }

    async fn delete_message(
        &self,
        message_id: MessageId,
        pop_receipt: PopReceipt,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let current = state
            .messages
            .get(&message_id)
            .is_some_and(|stored| stored.pop_receipt == pop_receipt);
        if !current {
            return Err(QueueError::MessageNotFound {
                message_id,
                pop_receipt,
            });
        }
        state.messages.remove(&message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn send_then_receive_roundtrip() {
        let queue = InMemoryQueue::new();
        let sent = queue.send_message("hello".into(), None).await.unwrap();

        let received = queue.receive_message(LEASE).await.unwrap().unwrap();
        assert_eq!(received.message_id, sent.message_id);
        assert_eq!(received.body, "hello");
        assert_eq!(received.dequeue_count, 1);
        assert_ne!(received.pop_receipt, sent.pop_receipt);
    }

    #[tokio::test]
    async fn receive_on_empty_queue_returns_none() {
        let queue = InMemoryQueue::new();
        assert!(queue.receive_message(LEASE).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn received_message_is_hidden_until_lease_expires() {
        let queue = InMemoryQueue::new();
        queue.send_message("m".into(), None).await.unwrap();

        let first = queue.receive_message(LEASE).await.unwrap().unwrap();
        assert!(queue.receive_message(LEASE).await.unwrap().is_none());

        tokio::time::advance(LEASE + Duration::from_millis(1)).await;

        let second = queue.receive_message(LEASE).await.unwrap().unwrap();
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.dequeue_count, 2);
        assert_ne!(second.pop_receipt, first.pop_receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_send_is_invisible_until_due() {
        let queue = InMemoryQueue::new();
        queue
            .send_message("later".into(), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(queue.receive_message(LEASE).await.unwrap().is_none());
        assert_eq!(queue.visible_len().await, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(queue.receive_message(LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn huge_delays_do_not_overflow() {
        let queue = InMemoryQueue::new();
        let sent = queue
            .send_message("m".into(), Some(Duration::MAX))
            .await
            .unwrap();
        assert!(queue.receive_message(LEASE).await.unwrap().is_none());
        queue
            .delete_message(sent.message_id, sent.pop_receipt)
            .await
            .unwrap();

        queue.send_message("n".into(), None).await.unwrap();
        assert!(queue.receive_message(Duration::MAX).await.unwrap().is_some());
        assert_eq!(queue.visible_len().await, 0);
    }

    #[tokio::test]
    async fn delete_requires_current_pop_receipt() {
        let queue = InMemoryQueue::new();
        let sent = queue.send_message("m".into(), None).await.unwrap();
        let received = queue.receive_message(Duration::ZERO).await.unwrap().unwrap();

        let stale = queue.delete_message(sent.message_id, sent.pop_receipt).await;
        assert!(matches!(stale, Err(QueueError::MessageNotFound { .. })));

        queue
            .delete_message(received.message_id, received.pop_receipt)
            .await
            .unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn delayed_message_can_be_deleted_with_send_receipt() {
        let queue = InMemoryQueue::new();
        let sent = queue
            .send_message("reminder".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        queue
            .delete_message(sent.message_id, sent.pop_receipt)
            .await
            .unwrap();
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn messages_are_received_in_send_order() {
        let queue = InMemoryQueue::new();
        let a = queue.send_message("a".into(), None).await.unwrap();
        let b = queue.send_message("b".into(), None).await.unwrap();

        let first = queue.receive_message(LEASE).await.unwrap().unwrap();
        let second = queue.receive_message(LEASE).await.unwrap().unwrap();
        assert_eq!(first.message_id, a.message_id);
        assert_eq!(second.message_id, b.message_id);
    }
}
