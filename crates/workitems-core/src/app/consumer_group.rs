use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::consumer::WorkItemConsumer;

/// Consumer group handle.
/// - `request_shutdown()` stops every consumer at its next suspension point
/// - `shutdown_and_join()` also waits for them to exit
pub struct ConsumerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl ConsumerGroup {
    /// Spawn one task per consumer. The group's token is a child of
    /// `parent`, so cancelling the host cancels the group.
    pub fn spawn(consumers: Vec<WorkItemConsumer>, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();

        let joins = consumers
            .into_iter()
            .map(|consumer| {
                let consumer = Arc::new(consumer);
                let cancel = cancel.clone();
                tokio::spawn(async move { consumer.run(cancel).await })
            })
            .collect();

        Self { cancel, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Shutdown and wait for all consumers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for (consumer_id, join) in self.joins.into_iter().enumerate() {
            if let Err(err) = join.await {
                warn!(consumer_id, error = %err, "work item consumer task panicked");
            }
        }
    }
}
