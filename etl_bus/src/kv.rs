use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Per-pipeline key-value store with per-entry TTL, backing the dedup id
/// store and the two join buffers (§6.2).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// True iff `get` would currently return `Some`.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
