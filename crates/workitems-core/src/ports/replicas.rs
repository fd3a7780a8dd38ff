//! ReplicaResolver port - enumerates the replicas of the hosting service.
//!
//! Only the fleet-wide state fan-out uses this; a single replica never
//! needs to know about its peers.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
#[error("failed to enumerate replicas: {0}")]
pub struct ReplicaResolveError(pub String);

#[async_trait]
pub trait ReplicaResolver: Send + Sync {
    async fn replica_names(&self) -> Result<Vec<String>, ReplicaResolveError>;
}
