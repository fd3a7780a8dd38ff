//! ReplicaProcessingState - the persisted state machine of one replica.
//!
//! Stored in the shared store so operators (and the deployment drain) can
//! read and flip it from outside the process.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::ProcessingState;
use crate::ports::{JsonCache, StateStore, StoreError};

/// Hygiene only: a replica that disappears without cleaning up leaves an
/// entry that eventually expires.
pub const PROCESSING_STATE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

pub fn processing_state_key(replica: &str) -> String {
    format!("WorkItemProcessorState_{replica}")
}

pub struct ReplicaProcessingState {
    replica: String,
    cache: JsonCache<ProcessingState>,
}

impl ReplicaProcessingState {
    pub fn new(store: Arc<dyn StateStore>, replica: impl Into<String>) -> Self {
        let replica = replica.into();
        let cache = JsonCache::new(store, processing_state_key(&replica));
        Self { replica, cache }
    }

    pub fn replica(&self) -> &str {
        &self.replica
    }

    /// Never writes. A replica with nothing stored is `Stopped`.
    pub async fn get_state(&self) -> Result<ProcessingState, StoreError> {
        Ok(self.cache.get().await?.unwrap_or_default())
    }

    /// Boot: the replica is warming up and must not take work yet.
    pub async fn set_initializing(&self) -> Result<(), StoreError> {
        let from = self.get_state().await?;
        self.write(from, ProcessingState::Initializing).await
    }

    /// Initializing (or a drained replica) -> Working.
    pub async fn set_start(&self) -> Result<bool, StoreError> {
        self.transition("set_start", ProcessingState::Working, |from| {
            matches!(from, ProcessingState::Initializing | ProcessingState::Stopped)
        })
        .await
    }

    /// Initializing -> Stopped, when start-up ends without a start signal.
    pub async fn initialization_finished(&self) -> Result<bool, StoreError> {
        self.transition("initialization_finished", ProcessingState::Stopped, |from| {
            from == ProcessingState::Initializing
        })
        .await
    }

    /// Working/Initializing -> Stopping. In-flight items keep running; the
    /// last one to finish moves the replica to Stopped.
    pub async fn finish_work_items_and_stop(&self) -> Result<bool, StoreError> {
        self.transition(
            "finish_work_items_and_stop",
            ProcessingState::Stopping,
            ProcessingState::can_stop,
        )
        .await
    }

    /// Stopping -> Stopped. Called whenever in-flight reaches zero, so any
    /// other state is silently left alone.
    pub async fn set_stopped_if_stopping(&self) -> Result<bool, StoreError> {
        let from = self.get_state().await?;
        if from != ProcessingState::Stopping {
            return Ok(false);
        }
        self.write(from, ProcessingState::Stopped).await?;
        Ok(true)
    }

    async fn transition(
        &self,
        operation: &'static str,
        to: ProcessingState,
        allowed: impl Fn(ProcessingState) -> bool,
    ) -> Result<bool, StoreError> {
        let from = self.get_state().await?;
        if from == to {
            debug!(replica = %self.replica, state = %to, operation, "processing state unchanged");
            return Ok(false);
        }
        if !allowed(from) {
            warn!(
                replica = %self.replica,
                from = %from,
                to = %to,
                operation,
                "processing state transition not allowed; ignoring"
            );
            return Ok(false);
        }
        self.write(from, to).await?;
        Ok(true)
    }

    async fn write(&self, from: ProcessingState, to: ProcessingState) -> Result<(), StoreError> {
        self.cache.set(&to, PROCESSING_STATE_TTL).await?;
        info!(
            replica = %self.replica,
            from = %from,
            to = %to,
            "processing state changed"
        );
        Ok(())
    }
}
