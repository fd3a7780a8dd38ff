//! StateStore port - shared key/value store with TTLs and a lock primitive.
//!
//! Replica processing state, reminder receipts and the distributed mutex
//! all live here. Values are strings; `JsonCache<T>` layers typed access on
//! top for a single key.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("value under key '{key}' could not be (de)serialized: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite `key`; it expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Take the lock `key` for `token` if nobody holds it. The lock frees
    /// itself after `ttl` even if never released.
    async fn try_acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Release the lock `key` if it is still held by `token`.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError>;
}

/// Typed JSON view over one store key.
pub struct JsonCache<T> {
    store: Arc<dyn StateStore>,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> Result<Option<T>, StoreError> {
        match self.store.get(&self.key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Serialization {
                    key: self.key.clone(),
                    source,
                }),
            None => Ok(None),
        }
    }

    pub async fn set(&self, value: &T, ttl: Duration) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|source| StoreError::Serialization {
            key: self.key.clone(),
            source,
        })?;
        self.store.set(&self.key, raw, ttl).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&self.key).await.map(|_| ())
    }
}
