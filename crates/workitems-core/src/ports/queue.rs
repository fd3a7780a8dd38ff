//! WorkItemQueue port - durable queue with leases.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{MessageId, PopReceipt};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The receipt no longer matches the message (it was received again, or
    /// already deleted).
    #[error("message {message_id} not found or pop receipt {pop_receipt} is stale")]
    MessageNotFound {
        message_id: MessageId,
        pop_receipt: PopReceipt,
    },

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// Returned by a send. Enough to delete the message before it is received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub pop_receipt: PopReceipt,
}

/// A received message. The caller holds a lease until the invisibility
/// window passes; deleting requires the `pop_receipt` from this receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: MessageId,
    pub pop_receipt: PopReceipt,
    pub body: String,
    /// How many times this message has been received, this time included.
    pub dequeue_count: u32,
    /// When the message was sent. Used to measure queueing latency.
    pub inserted_at: DateTime<Utc>,
}

/// The queue the engine reads work items from.
///
/// Semantics expected from an implementation:
/// - a sent message becomes visible after `visibility_delay` (or at once);
/// - a received message is hidden for `invisibility` and then redelivered
///   with a higher `dequeue_count` unless it was deleted;
/// - every receive issues a fresh pop receipt and invalidates the old one.
#[async_trait]
pub trait WorkItemQueue: Send + Sync {
    async fn send_message(
        &self,
        body: String,
        visibility_delay: Option<Duration>,
    ) -> Result<SendReceipt, QueueError>;

    /// Receive at most one visible message, without waiting.
    async fn receive_message(&self, invisibility: Duration)
    -> Result<Option<QueueMessage>, QueueError>;

    async fn delete_message(
        &self,
        message_id: MessageId,
        pop_receipt: PopReceipt,
    ) -> Result<(), QueueError>;
}
