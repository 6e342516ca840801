use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::clients::redis_connector::{RedisAccessError, RedisConnector};
use crate::config::settings::RateLimitConfig;
use crate::error::RateLimitError;
use crate::models::Identity;

/// Window sizes the limiter counts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
}

impl Granularity {
    pub fn window_secs(self) -> i64 {
        match self {
            Granularity::Minute => 60,
            Granularity::Hour => 3600,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
        }
    }

    /// Start of the window containing `now`. A request exactly on a boundary
    /// opens the new window.
    pub fn window_start(self, now: DateTime<Utc>) -> i64 {
        let window = self.window_secs();
        now.timestamp().div_euclid(window) * window
    }

    /// Time left until the window containing `now` closes, rounded up to whole seconds.
    pub fn retry_after(self, now: DateTime<Utc>) -> Duration {
        let window_end_ms = (self.window_start(now) + self.window_secs()) * 1000;
        let remaining_ms = (window_end_ms - now.timestamp_millis()).max(1);
        let secs = (remaining_ms + 999) / 1000;
        Duration::from_secs(secs as u64)
    }
}

/// Counter for one fixed window
#[derive(Debug, Clone, Default)]
pub struct RateLimitEntry {
    count: u64,
    window_start: i64,
}

impl RateLimitEntry {
    /// Counts one request in the window starting at `window_start`, resetting
    /// first if the stored window has rolled over.
    fn hit(&mut self, window_start: i64) -> u64 {
        if self.window_start != window_start {
            self.count = 0;
            self.window_start = window_start;
        }
        self.count += 1;
        self.count
    }

    fn is_expired(&self, current_start: i64) -> bool {
        self.window_start < current_start
    }
}

/// Both windows of one identity. Kept in a single map entry so one shard
/// lock covers the whole admission decision.
#[derive(Debug, Clone, Default)]
pub struct IdentityWindows {
    minute: RateLimitEntry,
    hour: RateLimitEntry,
}

/// Successful admission, with the tighter of the two remaining budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admitted {
    pub remaining: u64,
}

/// Whether the Redis counters are usable. After a failure they are bypassed
/// for `cooldown`.
pub struct CounterStoreHealth {
    degraded: AtomicBool,
    retry_at: Mutex<Option<Instant>>,
    cooldown: Duration,
}

impl CounterStoreHealth {
    fn new(cooldown: Duration) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            retry_at: Mutex::new(None),
            cooldown,
        }
    }

    fn should_try(&self) -> bool {
        if !self.degraded.load(Ordering::Acquire) {
            return true;
        }
        match *self.retry_at.lock() {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    fn record_success(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!("Redis rate limit storage recovered");
        }
    }

    fn record_failure(&self, err: &RedisAccessError) {
        *self.retry_at.lock() = Some(Instant::now() + self.cooldown);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                "Redis rate limit storage unavailable ({}). Counting locally for at least {}s.",
                err,
                self.cooldown.as_secs()
            );
        } else {
            debug!("Redis rate limit storage still unavailable: {}", err);
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }
}

/// Storage backend for rate limiting
#[derive(Clone)]
pub enum RateLimitStorage {
    /// In-memory storage using DashMap (single instance)
    Memory {
        windows: Arc<DashMap<String, IdentityWindows>>,
    },
    /// Redis-based storage (distributed), degrading to local counters on failure
    Redis {
        connector: Arc<RedisConnector>,
        fallback: Arc<DashMap<String, IdentityWindows>>,
        health: Arc<CounterStoreHealth>,
    },
}

impl RateLimitStorage {
    /// Create a new in-memory storage
    pub fn new_memory() -> Self {
        Self::Memory {
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Create a Redis-backed storage sharing `connector`. A failed store is
    /// skipped for `retry_cooldown` before Redis is tried again.
    pub fn new_redis(connector: Arc<RedisConnector>, retry_cooldown: Duration) -> Self {
        Self::Redis {
            connector,
            fallback: Arc::new(DashMap::new()),
            health: Arc::new(CounterStoreHealth::new(retry_cooldown)),
        }
    }

    /// True while Redis counters are bypassed in favour of local ones.
    pub fn is_degraded(&self) -> bool {
        match self {
            Self::Memory { .. } => false,
            Self::Redis { health, .. } => health.is_degraded(),
        }
    }

    fn local_windows(&self) -> &Arc<DashMap<String, IdentityWindows>> {
        match self {
            Self::Memory { windows } => windows,
            Self::Redis { fallback, .. } => fallback,
        }
    }

    fn hit_memory(
        windows: &DashMap<String, IdentityWindows>,
        identity_id: &str,
        minute_start: i64,
        hour_start: i64,
    ) -> (u64, u64) {
        let mut entry = windows.entry(identity_id.to_string()).or_default();
        let minute = entry.minute.hit(minute_start);
        let hour = entry.hour.hit(hour_start);
        (minute, hour)
    }

    async fn hit_redis(
        connector: &RedisConnector,
        key_prefix: &str,
        identity_id: &str,
        minute_start: i64,
        hour_start: i64,
    ) -> Result<(u64, u64), RedisAccessError> {
        let minute_key = format!(
            "rate_limit:{}:{}:{}:{}",
            key_prefix,
            Granularity::Minute.as_str(),
            identity_id,
            minute_start
        );
        let hour_key = format!(
            "rate_limit:{}:{}:{}:{}",
            key_prefix,
            Granularity::Hour.as_str(),
            identity_id,
            hour_start
        );
        // Keys outlive their window slightly so a late INCR never recreates a dead window.
        let minute_ttl = Granularity::Minute.window_secs() + 5;
        let hour_ttl = Granularity::Hour.window_secs() + 5;

        connector
            .run(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .incr(&minute_key, 1u64)
                    .expire(&minute_key, minute_ttl)
                    .ignore()
                    .incr(&hour_key, 1u64)
                    .expire(&hour_key, hour_ttl)
                    .ignore()
                    .query_async::<(u64, u64)>(&mut conn)
                    .await
            })
            .await
    }

    /// Counts one request for `identity_id` in both windows and returns the new counts.
    pub async fn hit(&self, key_prefix: &str, identity_id: &str, now: DateTime<Utc>) -> (u64, u64) {
        let minute_start = Granularity::Minute.window_start(now);
        let hour_start = Granularity::Hour.window_start(now);

        match self {
            Self::Memory { windows } => Self::hit_memory(windows, identity_id, minute_start, hour_start),
            Self::Redis {
                connector,
                fallback,
                health,
            } => {
                if !health.should_try() {
                    return Self::hit_memory(fallback, identity_id, minute_start, hour_start);
                }
                match Self::hit_redis(connector, key_prefix, identity_id, minute_start, hour_start).await {
                    Ok(counts) => {
                        health.record_success();
                        counts
                    }
                    // Another request is connecting; count this one locally without judging Redis.
                    Err(RedisAccessError::Connecting) => {
                        debug!("Redis connection in progress, counting {} locally", identity_id);
                        Self::hit_memory(fallback, identity_id, minute_start, hour_start)
                    }
                    Err(e) => {
                        health.record_failure(&e);
                        Self::hit_memory(fallback, identity_id, minute_start, hour_start)
                    }
                }
            }
        }
    }

    /// Drops identities whose windows have all closed
    pub fn cleanup_expired_entries(&self, now: DateTime<Utc>) {
        let minute_start = Granularity::Minute.window_start(now);
        let hour_start = Granularity::Hour.window_start(now);
        let windows = self.local_windows();
        let before = windows.len();
        windows.retain(|_, w| !(w.minute.is_expired(minute_start) && w.hour.is_expired(hour_start)));
        debug!(
            "Rate limit cleanup removed {} idle identities",
            before.saturating_sub(windows.len())
        );
    }

    pub fn tracked_identities(&self) -> usize {
        self.local_windows().len()
    }
}

/// Fixed-window limiter checking a short and a long window per identity.
#[derive(Clone)]
pub struct RateLimiter {
    storage: RateLimitStorage,
    per_minute: u64,
    per_hour: u64,
    key_prefix: String,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, storage: RateLimitStorage) -> Self {
        Self {
            storage,
            per_minute: config.per_minute,
            per_hour: config.per_hour,
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// Admits or rejects one request from `identity` at `now`.
    ///
    /// A ceiling of zero disables that granularity.
    pub async fn admit(&self, identity: &Identity, now: DateTime<Utc>) -> Result<Admitted, RateLimitError> {
        let (minute_count, hour_count) = self.storage.hit(&self.key_prefix, &identity.id, now).await;

        let mut retry_after: Option<Duration> = None;
        for (granularity, count, ceiling) in [
            (Granularity::Minute, minute_count, self.per_minute),
            (Granularity::Hour, hour_count, self.per_hour),
        ] {
            if ceiling > 0 && count > ceiling {
                let wait = granularity.retry_after(now);
                retry_after = Some(retry_after.map_or(wait, |current| current.max(wait)));
                debug!(
                    "Identity {} over {} ceiling ({}/{})",
                    identity.id,
                    granularity.as_str(),
                    count,
                    ceiling
                );
            }
        }

        if let Some(retry_after) = retry_after {
            warn!(
                "Rate limit exceeded for identity {} (retry after {}s)",
                identity.id,
                retry_after.as_secs()
            );
            return Err(RateLimitError { retry_after });
        }

        let remaining = |count: u64, ceiling: u64| if ceiling == 0 { u64::MAX } else { ceiling - count };
        Ok(Admitted {
            remaining: remaining(minute_count, self.per_minute).min(remaining(hour_count, self.per_hour)),
        })
    }
}

/// Start a background task for cleaning up idle rate limit entries
pub async fn start_memory_store_cleanup_task(storage: RateLimitStorage, cleanup_interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval_secs.max(1)));
    info!(
        "Starting rate limit memory store cleanup task (interval: {}s)",
        cleanup_interval_secs
    );

    loop {
        interval.tick().await;
        storage.cleanup_expired_entries(Utc::now());
    }
}
