//! In-memory cache provider using Moka
//!
//! Process-local store with per-entry TTL, capped by a tier-wide maximum.
//! Backs the L1 and L3 tiers of the tiered cache and stands in for the
//! shared tier in single-process deployments.
//!
//! **Important**: This cache is NOT distributed. Each process maintains its own
//! cache state.

use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheService;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with
struct PerEntryTtl;

impl moka::Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory cache service using Moka
#[derive(Clone)]
pub struct MemoryCacheService {
    cache: moka::future::Cache<String, Entry>,
    max_ttl: Duration,
}

impl std::fmt::Debug for MemoryCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheService")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl MemoryCacheService {
    /// Create a bounded store; no entry outlives `max_ttl`
    pub fn new(max_capacity: u64, max_ttl: Duration) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        debug!(
            max_capacity = max_capacity,
            max_ttl_seconds = max_ttl.as_secs(),
            "In-memory cache service created"
        );

        Self { cache, max_ttl }
    }

    /// Tier-wide TTL cap
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions so `entry_count` is exact
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl CacheService for MemoryCacheService {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let ttl = ttl.min(self.max_ttl);
        self.cache
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let matching: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| {
                if pattern.ends_with('*') {
                    key.starts_with(prefix)
                } else {
                    key.as_str() == pattern
                }
            })
            .map(|(key, _)| String::clone(&key))
            .collect();

        for key in &matching {
            self.cache.invalidate(key).await;
        }
        Ok(matching.len() as u64)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
