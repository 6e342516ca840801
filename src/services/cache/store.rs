use async_trait::async_trait;
use std::time::Duration;

use super::pattern::GlobPattern;
use crate::clients::redis_connector::RedisAccessError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache store is full ({capacity} entries)")]
    Full { capacity: usize },
}

impl From<RedisAccessError> for StoreError {
    fn from(err: RedisAccessError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// A key/value store with per-entry expiry and glob invalidation.
///
/// Values are opaque strings; the cache layer owns their encoding.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Removes every key matching `pattern`, returning how many were removed.
    async fn invalidate(&self, pattern: &GlobPattern) -> Result<usize, StoreError>;

    /// Number of live entries. Shared backends may report an approximation.
    async fn entry_count(&self) -> Result<usize, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
