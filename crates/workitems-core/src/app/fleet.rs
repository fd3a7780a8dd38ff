//! FleetProcessingState - processing state of every replica of a service.
//!
//! Used by deployment tooling: drain the old revision, wait until all of
//! its replicas report Stopped, then start the new one.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::processing_state::ReplicaProcessingState;
use crate::domain::ProcessingState;
use crate::ports::{ReplicaResolveError, ReplicaResolver, StateStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error(transparent)]
    Resolve(#[from] ReplicaResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct FleetProcessingState {
    resolver: Arc<dyn ReplicaResolver>,
    store: Arc<dyn StateStore>,
}

impl FleetProcessingState {
    pub fn new(resolver: Arc<dyn ReplicaResolver>, store: Arc<dyn StateStore>) -> Self {
        Self { resolver, store }
    }

    async fn replicas(&self) -> Result<Vec<ReplicaProcessingState>, FleetError> {
        Ok(self
            .resolver
            .replica_names()
            .await?
            .into_iter()
            .map(|name| ReplicaProcessingState::new(Arc::clone(&self.store), name))
            .collect())
    }

    /// `(replica, state)` for every replica, in resolver order.
    pub async fn get_states(&self) -> Result<Vec<(String, ProcessingState)>, FleetError> {
        let mut states = Vec::new();
        for replica in self.replicas().await? {
            let state = replica.get_state().await?;
            states.push((replica.replica().to_string(), state));
        }
        Ok(states)
    }

    pub async fn start_all(&self) -> Result<(), FleetError> {
        for replica in self.replicas().await? {
            replica.set_start().await?;
        }
        Ok(())
    }

    pub async fn finish_work_items_and_stop_all(&self) -> Result<(), FleetError> {
        for replica in self.replicas().await? {
            replica.finish_work_items_and_stop().await?;
        }
        Ok(())
    }

    /// Request a drain everywhere, then poll up to `max_attempts` times,
    /// `interval` apart, until every replica is Stopped. Returns whether it
    /// got there.
    pub async fn stop_all_and_wait(
        &self,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<bool, FleetError> {
        self.finish_work_items_and_stop_all().await?;

        for attempt in 1..=max_attempts {
            let states = self.get_states().await?;
            let pending: Vec<_> = states
                .iter()
                .filter(|(_, state)| *state != ProcessingState::Stopped)
                .map(|(name, _)| name.as_str())
                .collect();

            if pending.is_empty() {
                info!(replicas = states.len(), "all replicas stopped");
                return Ok(true);
            }

            info!(attempt, max_attempts, ?pending, "waiting for replicas to stop");
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Ok(false)
    }
}
