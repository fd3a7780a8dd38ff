//! WorkItemConsumer - receive, dispatch, acknowledge.
//!
//! One iteration (`process_next`):
//! 1. open a scope (waits for the replica to be Working)
//! 2. receive one message; nothing there means an empty poll
//! 3. parse the envelope; garbage is deleted as poison
//! 4. run it in the scope and decide: delete on success, delete when
//!    non-retriable or out of retries, otherwise leave it for redelivery
//! 5. close the scope
//!
//! `run` repeats that until cancelled. Cancellation mid-item leaves the
//! message on the queue, as if the process had crashed before acking.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::scope::{ScopeManager, WorkItemScope};
use crate::config::WorkItemConsumerOptions;
use crate::domain::WorkItemEnvelope;
use crate::error::ProcessingError;
use crate::observability::ConsumerCounters;
use crate::ports::{Clock, QueueMessage, TelemetryRecorder, WorkItemQueue};

/// What one `process_next` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The queue had nothing visible.
    Empty,
    /// Processed and deleted. `success` is the processor's own verdict.
    Completed { success: bool },
    /// Deleted without being processed successfully.
    Discarded,
    /// Failed; left on the queue to reappear after the invisibility window.
    Retained,
    /// Shutdown was requested; the message (if any) was left alone.
    Cancelled,
}

pub struct WorkItemConsumer {
    consumer_id: usize,
    queue: Arc<dyn WorkItemQueue>,
    scopes: Arc<ScopeManager>,
    telemetry: Arc<dyn TelemetryRecorder>,
    clock: Arc<dyn Clock>,
    options: Arc<WorkItemConsumerOptions>,
    counters: Arc<ConsumerCounters>,
}

impl WorkItemConsumer {
    pub fn new(
        consumer_id: usize,
        queue: Arc<dyn WorkItemQueue>,
        scopes: Arc<ScopeManager>,
        telemetry: Arc<dyn TelemetryRecorder>,
        clock: Arc<dyn Clock>,
        options: Arc<WorkItemConsumerOptions>,
        counters: Arc<ConsumerCounters>,
    ) -> Self {
        Self {
            consumer_id,
            queue,
            scopes,
            telemetry,
            clock,
            options,
            counters,
        }
    }

    pub fn consumer_id(&self) -> usize {
        self.consumer_id
    }

    /// Loop until `cancel` fires. Errors from the queue or the store are
    /// logged and retried after the poll timeout.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            consumer_id = self.consumer_id,
            queue = %self.options.work_item_queue_name,
            "work item consumer started"
        );

        loop {
            let pause = match self.process_next(&cancel).await {
                Ok(ConsumeOutcome::Cancelled) => break,
                Ok(ConsumeOutcome::Empty) => Some(self.options.queue_poll_timeout),
                Ok(_) => None,
                Err(err) => {
                    error!(
                        consumer_id = self.consumer_id,
                        error = %err,
                        "work item consumer iteration failed"
                    );
                    Some(self.options.queue_poll_timeout)
                }
            };

            if let Some(pause) = pause {
                if !sleep_or_cancel(pause, &cancel).await {
                    break;
                }
            } else if cancel.is_cancelled() {
                break;
            }
        }

        info!(consumer_id = self.consumer_id, "work item consumer stopped");
    }

    /// Handle at most one message.
    pub async fn process_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ConsumeOutcome, ProcessingError> {
        let scope = match self.scopes.begin_scope_when_ready(cancel).await {
            Ok(scope) => scope,
            Err(ProcessingError::Cancelled) => return Ok(ConsumeOutcome::Cancelled),
            Err(err) => return Err(err),
        };

        let outcome = self.consume_one(&scope, cancel).await;
        scope.finish().await;
        outcome
    }

    async fn consume_one(
        &self,
        scope: &WorkItemScope,
        cancel: &CancellationToken,
    ) -> Result<ConsumeOutcome, ProcessingError> {
        let Some(message) = self
            .queue
            .receive_message(self.options.queue_message_invisibility_time)
            .await?
        else {
            self.counters.record_empty_poll();
            return Ok(ConsumeOutcome::Empty);
        };

        let envelope = match WorkItemEnvelope::parse(&message.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    error = %err,
                    "unparseable work item; deleting"
                );
                return self.discard(&message).await;
            }
        };

        let waited = (self.clock.now() - message.inserted_at)
            .to_std()
            .unwrap_or_default();
        self.telemetry.record_message_receipt(
            envelope.work_item_type(),
            envelope.delay().map(Duration::from_secs),
            waited,
        );

        let operation_id = message.message_id.to_string();
        match scope
            .run(&envelope, message.dequeue_count, &operation_id, cancel)
            .await
        {
            Ok(success) => {
                self.queue
                    .delete_message(message.message_id, message.pop_receipt)
                    .await?;
                self.counters.record_completed();
                Ok(ConsumeOutcome::Completed { success })
            }
            Err(err) if err.is_cancelled() => {
                warn!(
                    work_item_type = envelope.work_item_type(),
                    message_id = %message.message_id,
                    "work item cancelled; leaving it for redelivery"
                );
                Ok(ConsumeOutcome::Cancelled)
            }
            Err(err)
                if !err.is_retriable()
                    || message.dequeue_count >= self.options.max_work_item_retries =>
            {
                error!(
                    work_item_type = envelope.work_item_type(),
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    retriable = err.is_retriable(),
                    error = %err,
                    "work item failed permanently; deleting"
                );
                self.discard(&message).await
            }
            Err(err) => {
                error!(
                    work_item_type = envelope.work_item_type(),
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    error = %err,
                    "work item failed; it will be retried"
                );
                self.counters.record_retained();
                Ok(ConsumeOutcome::Retained)
            }
        }
    }

    async fn discard(&self, message: &QueueMessage) -> Result<ConsumeOutcome, ProcessingError> {
        self.queue
            .delete_message(message.message_id, message.pop_receipt)
            .await?;
        self.counters.record_discarded();
        Ok(ConsumeOutcome::Discarded)
    }
}

/// Returns false if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::app::processing_state::ReplicaProcessingState;
    use crate::app::producer::WorkItemProducer;
    use crate::impls::{InMemoryQueue, InMemoryStore};
    use crate::ports::{NoTelemetryRecorder, SystemClock};
    use crate::typed::processor::testing::{CountingProcessor, Greeting};
    use crate::typed::{Processor, ProcessorRegistry};

    const LEASE: Duration = Duration::from_secs(30);

    struct Harness {
        consumer: WorkItemConsumer,
        queue: Arc<InMemoryQueue>,
        state: Arc<ReplicaProcessingState>,
        counters: Arc<ConsumerCounters>,
    }

    fn harness(registry: ProcessorRegistry, max_retries: u32) -> Harness {
        let queue = Arc::new(InMemoryQueue::new());
        let store = Arc::new(InMemoryStore::new());
        let state = Arc::new(ReplicaProcessingState::new(store.clone(), "replica-0"));
        let telemetry: Arc<dyn TelemetryRecorder> = Arc::new(NoTelemetryRecorder);
        let scopes = Arc::new(ScopeManager::new(
            state.clone(),
            Arc::new(registry),
            telemetry.clone(),
            store,
            Duration::from_millis(100),
        ));
        let options = WorkItemConsumerOptions::default()
            .with_invisibility_time(LEASE)
            .with_poll_timeout(Duration::from_millis(100))
            .with_max_retries(max_retries);
        let counters = Arc::new(ConsumerCounters::default());

        let consumer = WorkItemConsumer::new(
            0,
            queue.clone(),
            scopes,
            telemetry,
            Arc::new(SystemClock),
            Arc::new(options),
            counters.clone(),
        );
        Harness {
            consumer,
            queue,
            state,
            counters,
        }
    }

    fn registry_with(processor: Arc<CountingProcessor>) -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Greeting, _>(processor).unwrap();
        registry
    }

    async fn produce_greeting(queue: &Arc<InMemoryQueue>) {
        WorkItemProducer::<Greeting>::new(queue.clone())
            .produce(&Greeting { name: "ada".into() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn produced_item_is_processed_once_and_deleted() {
        let processor = Arc::new(CountingProcessor::default());
        let h = harness(registry_with(processor.clone()), 5);
        h.state.set_start().await.unwrap();
        produce_greeting(&h.queue).await;

        let cancel = CancellationToken::new();
        let outcome = h.consumer.process_next(&cancel).await.unwrap();

        assert_eq!(outcome, ConsumeOutcome::Completed { success: true });
        assert_eq!(processor.calls(), 1);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.counters.snapshot().completed, 1);

        let outcome = h.consumer.process_next(&cancel).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Empty);
        assert_eq!(processor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_item_is_retried_until_the_ceiling_then_deleted() {
        let processor = Arc::new(CountingProcessor::failing());
        let h = harness(registry_with(processor.clone()), 3);
        h.state.set_start().await.unwrap();
        produce_greeting(&h.queue).await;
        let cancel = CancellationToken::new();

        for attempt in 1..=2 {
            let outcome = h.consumer.process_next(&cancel).await.unwrap();
            assert_eq!(outcome, ConsumeOutcome::Retained, "attempt {attempt}");
            assert_eq!(h.queue.len().await, 1);
            tokio::time::advance(LEASE + Duration::from_millis(1)).await;
        }

        let outcome = h.consumer.process_next(&cancel).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::Discarded);
        assert!(h.queue.is_empty().await);
        assert_eq!(processor.calls(), 3);
        assert_eq!(
            h.counters.snapshot(),
            crate::observability::ConsumerCounts {
                completed: 0,
                discarded: 1,
                retained: 2,
                empty_polls: 0,
            }
        );
    }

    #[tokio::test]
    async fn failure_below_the_ceiling_keeps_the_message() {
        let processor = Arc::new(CountingProcessor::failing());
        let h = harness(registry_with(processor.clone()), 5);
        h.state.set_start().await.unwrap();
        produce_greeting(&h.queue).await;

        let outcome = h
            .consumer
            .process_next(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Retained);
        assert_eq!(h.queue.len().await, 1);
    }

    /// Fails a fixed number of times, then succeeds.
    struct FlakyProcessor {
        failures_left: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Processor<Greeting> for Arc<FlakyProcessor> {
        async fn process(
            &self,
            _item: Greeting,
            _cancel: &CancellationToken,
        ) -> Result<bool, ProcessingError> {
            let before = self
                .failures_left
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |left| left.checked_sub(1),
                );
            match before {
                Ok(_) => Err(anyhow::anyhow!("transient failure").into()),
                Err(_) => Ok(true),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_the_last_allowed_attempt_is_acked_not_discarded() {
        let processor = Arc::new(FlakyProcessor {
            failures_left: 2.into(),
        });
        let mut registry = ProcessorRegistry::new();
        registry.register::<Greeting, _>(processor).unwrap();
        let h = harness(registry, 3);
        h.state.set_start().await.unwrap();
        produce_greeting(&h.queue).await;
        let cancel = CancellationToken::new();

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(h.consumer.process_next(&cancel).await.unwrap());
            tokio::time::advance(LEASE + Duration::from_millis(1)).await;
        }

        assert_eq!(
            outcomes,
            vec![
                ConsumeOutcome::Retained,
                ConsumeOutcome::Retained,
                ConsumeOutcome::Completed { success: true },
            ]
        );
        assert!(h.queue.is_empty().await);
        let counts = h.counters.snapshot();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.discarded, 0);
    }

    #[rstest]
    #[case::unknown_type(json!({"type": "Nonexistent", "name": "x"}).to_string())]
    #[case::missing_type(json!({"name": "x"}).to_string())]
    #[case::not_json("definitely not json".to_string())]
    #[case::undecodable_payload(json!({"type": "Greeting", "name": 42}).to_string())]
    #[tokio::test]
    async fn poison_messages_are_deleted_without_processing(#[case] body: String) {
        let processor = Arc::new(CountingProcessor::default());
        let h = harness(registry_with(processor.clone()), 5);
        h.state.set_start().await.unwrap();
        h.queue.send_message(body, None).await.unwrap();

        let outcome = h
            .consumer
            .process_next(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Discarded);
        assert_eq!(processor.calls(), 0);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_type_is_discarded_on_first_delivery_despite_retry_budget() {
        let h = harness(ProcessorRegistry::new(), 100);
        h.state.set_start().await.unwrap();
        let sent = h
            .queue
            .send_message(json!({"type": "Nonexistent"}).to_string(), None)
            .await
            .unwrap();

        let outcome = h
            .consumer
            .process_next(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Discarded);
        assert_eq!(h.queue.dequeue_count(sent.message_id).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_received_unless_working() {
        let processor = Arc::new(CountingProcessor::default());
        let h = harness(registry_with(processor.clone()), 5);
        h.state.set_initializing().await.unwrap();
        produce_greeting(&h.queue).await;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                cancel.cancel();
            })
        };

        let outcome = h.consumer.process_next(&cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome, ConsumeOutcome::Cancelled);
        assert_eq!(processor.calls(), 0);
        assert_eq!(h.queue.visible_len().await, 1);
    }

    /// Blocks until cancelled, like a processor honouring shutdown.
    struct BlockingProcessor;

    #[async_trait]
    impl Processor<Greeting> for BlockingProcessor {
        async fn process(
            &self,
            _item: Greeting,
            cancel: &CancellationToken,
        ) -> Result<bool, ProcessingError> {
            cancel.cancelled().await;
            Err(ProcessingError::Cancelled)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_item_is_left_on_the_queue_and_the_loop_exits() {
        let mut registry = ProcessorRegistry::new();
        registry.register::<Greeting, _>(BlockingProcessor).unwrap();
        let h = harness(registry, 5);
        h.state.set_start().await.unwrap();
        produce_greeting(&h.queue).await;

        let cancel = CancellationToken::new();
        let consumer = Arc::new(h.consumer);
        let running = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        running.await.unwrap();

        assert_eq!(h.queue.len().await, 1);
        assert_eq!(h.counters.snapshot().completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_queue_then_stops_on_cancel() {
        let processor = Arc::new(CountingProcessor::default());
        let h = harness(registry_with(processor.clone()), 5);
        h.state.set_start().await.unwrap();
        for _ in 0..3 {
            produce_greeting(&h.queue).await;
        }

        let cancel = CancellationToken::new();
        let consumer = Arc::new(h.consumer);
        let running = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        running.await.unwrap();

        assert_eq!(processor.calls(), 3);
        assert!(h.queue.is_empty().await);
        assert!(h.counters.snapshot().empty_polls >= 1);
    }
}
