//! WorkItemsBuilder - wires processors, ports and options into a host.
//!
//! Fail-fast: `expect_work_item_types` lists the types this deployment must
//! handle; `build()` refuses to start if any of them has no processor.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::consumer::WorkItemConsumer;
use super::consumer_group::ConsumerGroup;
use super::processing_state::ReplicaProcessingState;
use super::producer::WorkItemProducerFactory;
use super::retry::RetryPolicy;
use super::scope::ScopeManager;
use crate::config::{ConfigError, WorkItemConsumerOptions};
use crate::domain::WorkItem;
use crate::observability::{ConsumerCounters, ConsumerCounts};
use crate::ports::{
    Clock, StateStore, StoreError, SystemClock, TelemetryRecorder, TracingTelemetryRecorder,
    WorkItemQueue,
};
use crate::typed::{Processor, ProcessorRegistry, RegistryError};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing work item types: {0:?}. These were expected but have no processor.")]
    MissingWorkItemTypes(Vec<String>),

    #[error("no {0} configured")]
    MissingPort(&'static str),

    #[error(transparent)]
    InvalidOptions(#[from] ConfigError),
}

pub struct WorkItemsBuilder {
    registry: ProcessorRegistry,
    expected_types: Option<Vec<String>>,
    options: WorkItemConsumerOptions,
    replica_name: String,
    queue: Option<Arc<dyn WorkItemQueue>>,
    store: Option<Arc<dyn StateStore>>,
    telemetry: Arc<dyn TelemetryRecorder>,
    clock: Arc<dyn Clock>,
    lock_retry: RetryPolicy,
}

impl WorkItemsBuilder {
    pub fn new(replica_name: impl Into<String>) -> Self {
        Self {
            registry: ProcessorRegistry::new(),
            expected_types: None,
            options: WorkItemConsumerOptions::default(),
            replica_name: replica_name.into(),
            queue: None,
            store: None,
            telemetry: Arc::new(TracingTelemetryRecorder),
            clock: Arc::new(SystemClock),
            lock_retry: RetryPolicy::mutex_acquisition(),
        }
    }

    pub fn register<T, P>(mut self, processor: P) -> Result<Self, RegistryError>
    where
        T: WorkItem,
        P: Processor<T> + 'static,
    {
        self.registry.register::<T, P>(processor)?;
        Ok(self)
    }

    pub fn register_with_factory<T, P, F>(mut self, factory: F) -> Result<Self, RegistryError>
    where
        T: WorkItem,
        P: Processor<T> + 'static,
        F: Fn() -> anyhow::Result<P> + Send + Sync + 'static,
    {
        self.registry.register_with_factory::<T, P, F>(factory)?;
        Ok(self)
    }

    pub fn expect_work_item_types(mut self, work_item_types: &[&str]) -> Self {
        self.expected_types = Some(work_item_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn options(mut self, options: WorkItemConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn queue(mut self, queue: Arc<dyn WorkItemQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryRecorder>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    pub fn build(self) -> Result<WorkItemHost, BuildError> {
        if let Some(expected) = &self.expected_types {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(&t.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingWorkItemTypes(missing));
            }
        }
        self.options.validate()?;

        let queue = self.queue.ok_or(BuildError::MissingPort("work item queue"))?;
        let store = self.store.ok_or(BuildError::MissingPort("state store"))?;

        let state = Arc::new(ReplicaProcessingState::new(
            Arc::clone(&store),
            self.replica_name,
        ));
        let scopes = Arc::new(
            ScopeManager::new(
                Arc::clone(&state),
                Arc::new(self.registry),
                Arc::clone(&self.telemetry),
                Arc::clone(&store),
                self.options.state_poll_interval,
            )
            .with_lock_retry(self.lock_retry),
        );

        Ok(WorkItemHost {
            producers: WorkItemProducerFactory::new(Arc::clone(&queue)),
            queue,
            store,
            state,
            scopes,
            telemetry: self.telemetry,
            clock: self.clock,
            options: Arc::new(self.options),
            counters: Arc::new(ConsumerCounters::default()),
            group: None,
        })
    }
}

/// A built engine for one replica. `start` spawns the consumers.
pub struct WorkItemHost {
    queue: Arc<dyn WorkItemQueue>,
    store: Arc<dyn StateStore>,
    state: Arc<ReplicaProcessingState>,
    scopes: Arc<ScopeManager>,
    telemetry: Arc<dyn TelemetryRecorder>,
    clock: Arc<dyn Clock>,
    options: Arc<WorkItemConsumerOptions>,
    counters: Arc<ConsumerCounters>,
    producers: WorkItemProducerFactory,
    group: Option<ConsumerGroup>,
}

impl WorkItemHost {
    /// Record the replica's initial state and spawn `consumer_count`
    /// consumers. Without `wait_for_initialization` the replica goes
    /// straight to Working; otherwise it stays Initializing until
    /// `processing_state().set_start()` is called.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), StoreError> {
        if self.group.is_some() {
            return Ok(());
        }

        self.state.set_initializing().await?;
        if !self.options.wait_for_initialization {
            self.state.set_start().await?;
        }

        let consumers: Vec<_> = (0..self.options.consumer_count)
            .map(|consumer_id| {
                WorkItemConsumer::new(
                    consumer_id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.scopes),
                    Arc::clone(&self.telemetry),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.options),
                    Arc::clone(&self.counters),
                )
            })
            .collect();
        self.group = Some(ConsumerGroup::spawn(consumers, cancel));

        info!(
            replica = %self.state.replica(),
            consumers = self.options.consumer_count,
            queue = %self.options.work_item_queue_name,
            "work item host started"
        );
        Ok(())
    }

    /// Cancel the consumers and wait for them. Items cancelled mid-flight
    /// stay on the queue.
    pub async fn shutdown(&mut self) {
        if let Some(group) = self.group.take() {
            group.shutdown_and_join().await;
            info!(replica = %self.state.replica(), "work item host stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.group.is_some()
    }

    pub fn processing_state(&self) -> &Arc<ReplicaProcessingState> {
        &self.state
    }

    pub fn scope_manager(&self) -> &Arc<ScopeManager> {
        &self.scopes
    }

    pub fn producers(&self) -> &WorkItemProducerFactory {
        &self.producers
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn counts(&self) -> ConsumerCounts {
        self.counters.snapshot()
    }
}
