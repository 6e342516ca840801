pub mod keys;
pub mod memory_store;
pub mod pattern;
pub mod redis_store;
pub mod store;

pub use keys::CacheKeys;
pub use memory_store::InMemoryStore;
pub use pattern::GlobPattern;
pub use redis_store::RedisStore;
pub use store::{CacheStore, StoreError};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::settings::CacheConfig;
use crate::error::CacheError;

/// Per-resource expiry, falling back to a default.
#[derive(Clone, Debug)]
pub struct TtlPolicy {
    default_ttl: Duration,
    per_resource: HashMap<String, Duration>,
}

impl TtlPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.default_ttl_secs.max(1)),
            per_resource: config
                .ttls
                .iter()
                .map(|(resource, secs)| (resource.clone(), Duration::from_secs((*secs).max(1))))
                .collect(),
        }
    }

    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.per_resource.get(resource).copied().unwrap_or(self.default_ttl)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub backend: &'static str,
    pub degraded: bool,
    pub hit_count: u64,
    pub miss_count: u64,
    pub entry_count: usize,
    pub pending_invalidations: usize,
}

/// Tracks whether the primary store is usable.
struct PrimaryHealth {
    degraded: AtomicBool,
    retry_at: Mutex<Option<Instant>>,
    cooldown: Duration,
    // Invalidations the primary missed while degraded, replayed on recovery.
    pending: Mutex<Vec<GlobPattern>>,
}

impl PrimaryHealth {
    fn new(cooldown: Duration) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            retry_at: Mutex::new(None),
            cooldown,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// The primary is skipped while degraded until the cooldown elapses.
    fn should_try(&self) -> bool {
        if !self.degraded.load(Ordering::Acquire) {
            return true;
        }
        match *self.retry_at.lock() {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    fn record_failure(&self, store: &str, err: &StoreError) {
        *self.retry_at.lock() = Some(Instant::now() + self.cooldown);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                "Cache backend '{}' unavailable ({}). Serving from in-process store for at least {}s.",
                store,
                err,
                self.cooldown.as_secs()
            );
        } else {
            debug!("Cache backend '{}' still unavailable: {}", store, err);
        }
    }

    fn queue_invalidation(&self, pattern: &GlobPattern) {
        let mut pending = self.pending.lock();
        if !pending.contains(pattern) {
            pending.push(pattern.clone());
        }
    }
}

/// Response cache in front of the ERP.
///
/// Reads and writes go to the primary store when one is configured and
/// healthy, otherwise to a bounded in-process store. A primary failure never
/// surfaces to callers; it flips the layer into degraded mode, logged once
/// per outage, and the primary is probed again after a cooldown.
/// Invalidations always reach the fallback and are queued for the primary
/// while it is unreachable.
pub struct CacheLayer {
    primary: Option<Arc<dyn CacheStore>>,
    fallback: Arc<InMemoryStore>,
    health: PrimaryHealth,
    keys: CacheKeys,
    ttl_policy: TtlPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    // Bumped by every invalidation; reads that straddle one do not persist.
    generation: AtomicU64,
}

impl CacheLayer {
    pub fn new(config: &CacheConfig, primary: Option<Arc<dyn CacheStore>>) -> Self {
        match &primary {
            Some(store) => info!("Response cache using '{}' with in-process fallback", store.name()),
            None => info!("Response cache using in-process store only"),
        }
        Self {
            primary,
            fallback: Arc::new(InMemoryStore::new(config.fallback_capacity)),
            health: PrimaryHealth::new(Duration::from_secs(config.retry_cooldown_secs)),
            keys: CacheKeys::new(&config.key_prefix),
            ttl_policy: TtlPolicy::from_config(config),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn keys(&self) -> &CacheKeys {
        &self.keys
    }

    pub fn ttl_for(&self, resource: &str) -> Duration {
        self.ttl_policy.ttl_for(resource)
    }

    pub fn fallback(&self) -> &Arc<InMemoryStore> {
        &self.fallback
    }

    pub fn is_degraded(&self) -> bool {
        self.primary.is_some() && self.health.degraded.load(Ordering::Acquire)
    }

    fn usable_primary(&self) -> Option<&Arc<dyn CacheStore>> {
        self.primary.as_ref().filter(|_| self.health.should_try())
    }

    async fn record_primary_success(&self, primary: &Arc<dyn CacheStore>) {
        if !self.health.degraded.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Cache backend '{}' recovered", primary.name());

        let pending: Vec<GlobPattern> = std::mem::take(&mut *self.health.pending.lock());
        for (index, pattern) in pending.iter().enumerate() {
            if let Err(e) = primary.invalidate(pattern).await {
                self.health.record_failure(primary.name(), &e);
                for missed in &pending[index..] {
                    self.health.queue_invalidation(missed);
                }
                return;
            }
        }
        if !pending.is_empty() {
            info!("Replayed {} invalidations missed during the outage", pending.len());
        }
    }

    /// Looks up `key`, counting the outcome as a hit or a miss.
    ///
    /// Undecodable entries count as misses.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let raw = self.get_raw(key).await?;
        let value = raw.and_then(|text| match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        });

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(primary) = self.usable_primary() {
            match primary.get(key).await {
                Ok(found) => {
                    self.record_primary_success(primary).await;
                    return Ok(found);
                }
                Err(e) => self.health.record_failure(primary.name(), &e),
            }
        }
        self.fallback
            .get(key)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Stores `value` under `key` for `ttl`.
    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(value).map_err(|e| CacheError::Unavailable(e.to_string()))?;

        if let Some(primary) = self.usable_primary() {
            match primary.set(key, &encoded, ttl).await {
                Ok(()) => {
                    self.record_primary_success(primary).await;
                    return Ok(());
                }
                Err(e) => self.health.record_failure(primary.name(), &e),
            }
        }
        self.fallback
            .set(key, &encoded, ttl)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    /// Current invalidation generation, sampled before an upstream fetch.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores a freshly fetched `value` unless an invalidation ran since
    /// `observed` was sampled. Returns whether the entry was kept.
    ///
    /// The generation is checked again after the write, so an invalidation
    /// racing with the write removes the entry it may have missed.
    pub async fn set_unless_invalidated(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        observed: u64,
    ) -> Result<bool, CacheError> {
        if self.generation() != observed {
            debug!("Skipping cache write for {}: invalidated during fetch", key);
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        if self.generation() != observed {
            debug!("Dropping cache entry {}: invalidated during write", key);
            self.remove_matching(&GlobPattern::new(&GlobPattern::escape(key))).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Removes every entry matching `pattern` and returns how many went away.
    pub async fn invalidate(&self, pattern: &GlobPattern) -> Result<usize, CacheError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.remove_matching(pattern).await
    }

    async fn remove_matching(&self, pattern: &GlobPattern) -> Result<usize, CacheError> {
        let mut removed = self
            .fallback
            .invalidate(pattern)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        if let Some(primary) = &self.primary {
            if self.health.should_try() {
                match primary.invalidate(pattern).await {
                    Ok(count) => {
                        removed += count;
                        self.record_primary_success(primary).await;
                    }
                    Err(e) => {
                        self.health.record_failure(primary.name(), &e);
                        self.health.queue_invalidation(pattern);
                    }
                }
            } else {
                self.health.queue_invalidation(pattern);
            }
        }

        debug!("Invalidated {} cache entries matching {}", removed, pattern);
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        let (backend, entry_count) = match self.usable_primary() {
            Some(primary) => match primary.entry_count().await {
                Ok(count) => (primary.name(), count),
                Err(e) => {
                    self.health.record_failure(primary.name(), &e);
                    (self.fallback.name(), self.fallback.entry_count().await.unwrap_or(0))
                }
            },
            None => (self.fallback.name(), self.fallback.entry_count().await.unwrap_or(0)),
        };

        CacheStats {
            backend,
            degraded: self.is_degraded(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            entry_count,
            pending_invalidations: self.health.pending.lock().len(),
        }
    }

    /// Probes the primary store, used by the health endpoint.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let Some(primary) = &self.primary else {
            return Ok(());
        };
        match primary.ping().await {
            Ok(()) => {
                self.record_primary_success(primary).await;
                Ok(())
            }
            Err(e) => {
                self.health.record_failure(primary.name(), &e);
                Err(CacheError::Unavailable(e.to_string()))
            }
        }
    }
}

/// Start a background task that drops expired fallback entries
pub async fn start_fallback_sweep_task(cache: Arc<CacheLayer>, sweep_interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs.max(1)));
    info!(
        "Starting fallback cache sweep task (interval: {}s)",
        sweep_interval_secs
    );

    loop {
        interval.tick().await;
        cache.fallback().sweep_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Primary store that can be switched off, backed by an in-memory store.
    struct FlakyStore {
        inner: InMemoryStore,
        down: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(100),
                down: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn invalidate(&self, pattern: &GlobPattern) -> Result<usize, StoreError> {
            self.check()?;
            self.inner.invalidate(pattern).await
        }
        async fn entry_count(&self) -> Result<usize, StoreError> {
            self.check()?;
            self.inner.entry_count().await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.check()
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            retry_cooldown_secs: 30,
            fallback_capacity: 100,
            ttls: HashMap::from([("financial".to_string(), 3600)]),
            ..CacheConfig::default()
        }
    }

    fn layer_with(primary: Arc<FlakyStore>) -> CacheLayer {
        CacheLayer::new(&config(), Some(primary as Arc<dyn CacheStore>))
    }

    #[test]
    fn test_ttl_policy() {
        let policy = TtlPolicy::from_config(&config());
        assert_eq!(policy.ttl_for("financial"), Duration::from_secs(3600));
        assert_eq!(policy.ttl_for("invoices"), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_hits_and_misses_are_counted() {
        let cache = CacheLayer::new(&config(), None);
        assert_eq!(cache.get("erp:invoices:list:").await.unwrap(), None);
        cache
            .set("erp:invoices:list:", &json!([{"id": "INV-1"}]), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("erp:invoices:list:").await.unwrap(),
            Some(json!([{"id": "INV-1"}]))
        );

        let stats = cache.stats().await;
        assert_eq!((stats.hit_count, stats.miss_count), (1, 1));
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.backend, "memory");
        assert!(!stats.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_outage_degrades_then_recovers() {
        let primary = Arc::new(FlakyStore::new());
        let cache = layer_with(primary.clone());

        primary.down.store(true, Ordering::SeqCst);
        cache.set("k", &json!(1), Duration::from_secs(600)).await.unwrap();
        assert!(cache.is_degraded());
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        // Within the cooldown the primary is not contacted again.
        let calls = primary.calls.load(Ordering::SeqCst);
        cache.get("k").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), calls);

        primary.down.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        cache.set("k2", &json!(2), Duration::from_secs(600)).await.unwrap();
        assert!(!cache.is_degraded());
        assert_eq!(primary.inner.get("k2").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidations_missed_during_outage_are_replayed() {
        let primary = Arc::new(FlakyStore::new());
        let cache = layer_with(primary.clone());
        let ttl = Duration::from_secs(600);

        cache.set("erp:invoices:list:", &json!([1]), ttl).await.unwrap();
        primary.down.store(true, Ordering::SeqCst);

        let pattern = cache.keys().list_pattern("invoices");
        cache.invalidate(&pattern).await.unwrap();
        cache.invalidate(&pattern).await.unwrap();
        assert_eq!(cache.stats().await.pending_invalidations, 1);

        primary.down.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.ping().await.is_ok());

        assert_eq!(primary.inner.get("erp:invoices:list:").await.unwrap(), None);
        assert_eq!(cache.stats().await.pending_invalidations, 0);
    }

    #[tokio::test]
    async fn test_invalidation_clears_fallback_while_primary_is_healthy() {
        let primary = Arc::new(FlakyStore::new());
        let cache = layer_with(primary.clone());
        cache
            .fallback()
            .set("erp:customers:list:", "[]", Duration::from_secs(600))
            .await
            .unwrap();
        cache
            .set("erp:customers:item:C1:", &json!({}), Duration::from_secs(600))
            .await
            .unwrap();

        let removed = cache.invalidate(&cache.keys().resource_pattern("customers")).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.fallback().get("erp:customers:list:").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_full_fallback_reports_unavailable() {
        let cache = CacheLayer::new(
            &CacheConfig {
                fallback_capacity: 1,
                ..CacheConfig::default()
            },
            None,
        );
        cache.set("a", &json!(1), Duration::from_secs(60)).await.unwrap();
        assert!(matches!(
            cache.set("b", &json!(2), Duration::from_secs(60)).await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_straddling_an_invalidation_is_not_cached() {
        let cache = CacheLayer::new(&config(), None);
        let key = "erp:invoices:list:limit=50&offset=0";
        let observed = cache.generation();

        cache.invalidate(&cache.keys().list_pattern("invoices")).await.unwrap();
        let kept = cache
            .set_unless_invalidated(key, &json!([]), Duration::from_secs(60), observed)
            .await
            .unwrap();
        assert!(!kept);
        assert_eq!(cache.fallback().get(key).await.unwrap(), None);

        let kept = cache
            .set_unless_invalidated(key, &json!([]), Duration::from_secs(60), cache.generation())
            .await
            .unwrap();
        assert!(kept);
    }
}
