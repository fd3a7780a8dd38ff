//! Scope manager - gates work on the replica state and runs one work item
//! per scope.
//!
//! A `WorkItemScope` is one slot of in-flight work. Opening one waits for
//! the replica to be `Working`; closing it (explicitly through `finish`, or
//! by drop) releases the slot and, if that was the last slot of a draining
//! replica, moves the replica to `Stopped`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use ulid::Ulid;

use super::processing_state::ReplicaProcessingState;
use super::retry::RetryPolicy;
use crate::domain::{ProcessingState, WorkItemEnvelope};
use crate::error::ProcessingError;
use crate::ports::{StateStore, TelemetryRecorder};
use crate::typed::{PreparedWorkItem, ProcessorRegistry};

/// How long a work item mutex survives a holder that never releases it.
pub const MUTEX_TTL: Duration = Duration::from_secs(60 * 60);

struct ScopeCore {
    state: Arc<ReplicaProcessingState>,
    registry: Arc<ProcessorRegistry>,
    telemetry: Arc<dyn TelemetryRecorder>,
    store: Arc<dyn StateStore>,
    in_flight: AtomicUsize,
    /// Serialises admitting a scope against finishing a drain, so a replica
    /// is never marked `Stopped` while a scope is being opened.
    admission: Mutex<()>,
    lock_retry: RetryPolicy,
}

impl ScopeCore {
    /// Returns true when this was the last in-flight scope.
    fn release_slot(&self) -> bool {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
    }

    async fn stop_if_draining(&self) {
        let _admission = self.admission.lock().await;
        if self.in_flight.load(Ordering::SeqCst) != 0 {
            return;
        }
        if let Err(err) = self.state.set_stopped_if_stopping().await {
            warn!(replica = %self.state.replica(), error = %err, "failed to finish draining");
        }
    }
}

pub struct ScopeManager {
    core: Arc<ScopeCore>,
    poll_interval: Duration,
}

impl ScopeManager {
    pub fn new(
        state: Arc<ReplicaProcessingState>,
        registry: Arc<ProcessorRegistry>,
        telemetry: Arc<dyn TelemetryRecorder>,
        store: Arc<dyn StateStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            core: Arc::new(ScopeCore {
                state,
                registry,
                telemetry,
                store,
                in_flight: AtomicUsize::new(0),
                admission: Mutex::new(()),
                lock_retry: RetryPolicy::mutex_acquisition(),
            }),
            poll_interval,
        }
    }

    pub fn with_lock_retry(mut self, policy: RetryPolicy) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.lock_retry = policy;
        }
        self
    }

    /// Wait until the replica is `Working`, then open a scope.
    ///
    /// A replica found `Stopping` with nothing in flight is moved to
    /// `Stopped` here, so a drain with no work finishes on its own.
    pub async fn begin_scope_when_ready(
        &self,
        cancel: &CancellationToken,
    ) -> Result<WorkItemScope, ProcessingError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ProcessingError::Cancelled);
            }

            {
                let _admission = self.core.admission.lock().await;
                let state = self.core.state.get_state().await?;
                if state.accepts_work() {
                    self.core.in_flight.fetch_add(1, Ordering::SeqCst);
                    return Ok(WorkItemScope {
                        core: Arc::clone(&self.core),
                        finished: false,
                    });
                }

                if state == ProcessingState::Stopping && self.in_flight() == 0 {
                    self.core.state.set_stopped_if_stopping().await?;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProcessingError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub async fn get_state(&self) -> Result<ProcessingState, ProcessingError> {
        Ok(self.core.state.get_state().await?)
    }

    pub async fn initialization_finished(&self) -> Result<bool, ProcessingError> {
        Ok(self.core.state.initialization_finished().await?)
    }

    pub fn in_flight(&self) -> usize {
        self.core.in_flight.load(Ordering::SeqCst)
    }

    pub fn processing_state(&self) -> &Arc<ReplicaProcessingState> {
        &self.core.state
    }
}

/// One in-flight slot. Release it with `finish`; dropping it also releases
/// the slot but can only schedule the drain check in the background.
pub struct WorkItemScope {
    core: Arc<ScopeCore>,
    finished: bool,
}

impl WorkItemScope {
    /// Dispatch one envelope: look up, resolve, decode, then run the
    /// processor, under its mutex if it declares one.
    ///
    /// `attempt` is the message's dequeue count and `operation_id` its
    /// message id; both go to telemetry and the processing span.
    pub async fn run(
        &self,
        envelope: &WorkItemEnvelope,
        attempt: u32,
        operation_id: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessingError> {
        let work_item_type = envelope.work_item_type();

        let registration = self
            .core
            .registry
            .lookup(work_item_type)
            .ok_or_else(|| ProcessingError::UnknownType(work_item_type.to_string()))?;
        let processor = registration.resolve()?;
        let prepared = processor.prepare(envelope.payload_value())?;

        let span = info_span!(
            "work_item",
            work_item_type,
            operation_id,
            attempt,
            context = prepared.logging_context().unwrap_or_default(),
        );
        let mut telemetry =
            self.core
                .telemetry
                .record_work_item_completion(work_item_type, attempt, operation_id);

        let result = self.execute(prepared, cancel).instrument(span).await;
        if matches!(result, Ok(true)) {
            telemetry.set_success();
        }
        result
    }

    async fn execute(
        &self,
        prepared: Box<dyn PreparedWorkItem>,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessingError> {
        let Some(key) = prepared.mutex_key().map(str::to_owned) else {
            return prepared.execute(cancel).await;
        };

        let store = &self.core.store;
        let token = Ulid::new().to_string();
        let mut attempts = 0u32;

        while !store.try_acquire_lock(&key, &token, MUTEX_TTL).await? {
            attempts += 1;
            let delay = self.core.lock_retry.next_delay_with_jitter(attempts);
            debug!(mutex_key = %key, attempts, ?delay, "work item mutex busy");
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProcessingError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let result = prepared.execute(cancel).await;

        match store.release_lock(&key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(mutex_key = %key, "work item mutex expired before release"),
            Err(err) => warn!(mutex_key = %key, error = %err, "failed to release work item mutex"),
        }

        result
    }

    /// Release the slot, and finish a drain if this was the last one.
    pub async fn finish(mut self) {
        self.finished = true;
        if self.core.release_slot() {
            self.core.stop_if_draining().await;
        }
    }
}

impl Drop for WorkItemScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.core.release_slot() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let core = Arc::clone(&self.core);
                handle.spawn(async move { core.stop_if_draining().await });
            }
        }
    }
}
