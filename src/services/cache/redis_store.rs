use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

use super::pattern::GlobPattern;
use super::store::{CacheStore, StoreError};
use crate::clients::redis_connector::RedisConnector;

const SCAN_BATCH: usize = 200;

/// Cache store backed by the shared Redis connection.
pub struct RedisStore {
    connector: Arc<RedisConnector>,
}

impl RedisStore {
    pub fn new(connector: Arc<RedisConnector>) -> Self {
        Self { connector }
    }

    /// Collects every key matching `pattern` with cursor-based SCAN.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let pattern = pattern.to_string();
            let (next, batch): (u64, Vec<String>) = self
                .connector
                .run(move |mut conn| async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        let value = self
            .connector
            .run(move |mut conn| async move {
                redis::cmd("GET").arg(&key).query_async::<Option<String>>(&mut conn).await
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.connector
            .run(move |mut conn| async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await?;
        Ok(())
    }

    async fn invalidate(&self, pattern: &GlobPattern) -> Result<usize, StoreError> {
        let keys = self.scan_keys(pattern.as_str()).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut removed = 0usize;
        for chunk in keys.chunks(SCAN_BATCH) {
            let chunk = chunk.to_vec();
            let deleted: usize = self
                .connector
                .run(move |mut conn| async move { redis::cmd("DEL").arg(&chunk).query_async(&mut conn).await })
                .await?;
            removed += deleted;
        }
        debug!("Invalidated {} Redis keys matching {}", removed, pattern);
        Ok(removed)
    }

    /// O(1) `DBSIZE`. Approximate: it also counts rate-limit and other
    /// keys living in the same database.
    async fn entry_count(&self) -> Result<usize, StoreError> {
        let size: usize = self
            .connector
            .run(|mut conn| async move { redis::cmd("DBSIZE").query_async(&mut conn).await })
            .await?;
        Ok(size)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let reply: String = self
            .connector
            .run(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {}", reply)))
        }
    }
}
