//! StaticReplicaResolver - fixed replica list, for single-host setups and tests.

use async_trait::async_trait;

use crate::ports::{ReplicaResolveError, ReplicaResolver};

#[derive(Debug, Clone, Default)]
pub struct StaticReplicaResolver {
    names: Vec<String>,
}

impl StaticReplicaResolver {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ReplicaResolver for StaticReplicaResolver {
    async fn replica_names(&self) -> Result<Vec<String>, ReplicaResolveError> {
        Ok(self.names.clone())
    }
}
