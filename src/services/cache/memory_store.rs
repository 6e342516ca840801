use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use std::time::Duration;
use tokio::time::Instant;

use super::pattern::GlobPattern;
use super::store::{CacheStore, StoreError};

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-process store used when the external cache is unreachable.
///
/// Expired entries are dropped lazily on read and in bulk by `sweep_expired`.
/// The capacity bound is checked before insertion, so concurrent inserts may
/// overshoot it by the number of racing writers.
pub struct InMemoryStore {
    entries: DashMap<String, MemoryEntry>,
    capacity: usize,
}

impl InMemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Removes all expired entries and returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Swept {} expired fallback cache entries", removed);
        }
        removed
    }

    fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|entry| !entry.is_expired(now)).count()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        // The read guard is released before removing.
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.sweep_expired();
            if self.entries.len() >= self.capacity {
                return Err(StoreError::Full {
                    capacity: self.capacity,
                });
            }
        }

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, pattern: &GlobPattern) -> Result<usize, StoreError> {
        let matching: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = matching
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed)
    }

    async fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.live_len())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
