use log::{debug, info};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum RedisAccessError {
    #[error("Redis operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Redis connection attempt already in progress")]
    Connecting,
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Lazily established Redis connection shared by the cache and the rate limiter.
///
/// Connecting is deferred to first use so the gateway can start while Redis
/// is down; every operation is bounded by `op_timeout`. Only one caller
/// connects at a time and concurrent callers fail fast with
/// [`RedisAccessError::Connecting`] instead of queueing behind it.
pub struct RedisConnector {
    client: redis::Client,
    manager: RwLock<Option<ConnectionManager>>,
    connecting: Mutex<()>,
    op_timeout: Duration,
}

impl RedisConnector {
    pub fn new(redis_url: &str, op_timeout: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            manager: RwLock::new(None),
            connecting: Mutex::new(()),
            op_timeout,
        })
    }

    /// Returns a cloned connection handle, connecting on first use.
    pub async fn connection(&self) -> Result<ConnectionManager, RedisAccessError> {
        if let Some(manager) = self.manager.read().as_ref() {
            return Ok(manager.clone());
        }

        let _connecting = self.connecting.try_lock().map_err(|_| RedisAccessError::Connecting)?;
        // Another caller may have finished connecting between the two checks.
        if let Some(manager) = self.manager.read().as_ref() {
            return Ok(manager.clone());
        }

        debug!("Establishing Redis connection");
        let manager = tokio::time::timeout(self.op_timeout, ConnectionManager::new(self.client.clone()))
            .await
            .map_err(|_| RedisAccessError::Timeout(self.op_timeout))??;
        info!("Redis connection established");
        *self.manager.write() = Some(manager.clone());
        Ok(manager)
    }

    /// Runs `op` against a live connection under the operation timeout.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, RedisAccessError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        tokio::time::timeout(self.op_timeout, op(conn))
            .await
            .map_err(|_| RedisAccessError::Timeout(self.op_timeout))?
            .map_err(RedisAccessError::from)
    }
}
