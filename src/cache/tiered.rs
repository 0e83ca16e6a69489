//! # Tiered Cache Manager
//!
//! Three cooperating tiers:
//!
//! ```text
//! get ──> L1 (process-local, short TTL)
//!           │ miss
//!           v
//!         L2 (shared, network) ── skipped while degraded
//!           │ miss / error
//!           v
//!         L3 (process-local fallback, own TTL)
//! ```
//!
//! Every successful read records an access. A key read at least
//! `promotion_threshold` times in the trailing minute is copied into L1.
//! `run_demotion_check` moves L1 keys idle longer than the demotion threshold
//! down to L3; `spawn_maintenance` runs it periodically.
//!
//! When the shared endpoint's health monitor reports UNHEALTHY the manager
//! degrades: reads skip L2 and writes aimed at L2 land in L3. It leaves
//! degraded mode when the monitor reports HEALTHY, or when a probe made after
//! `recovery_interval_seconds` succeeds.
//!
//! A value written to L1 or L3 supersedes the L2 copy of its key, which is
//! deleted. If L2 cannot be reached at that moment the key is marked, and L2
//! is not read for it until the old copy has been removed.

use crate::cache::access::{AccessRecord, CacheTier};
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::health::{RedisHealthState, SharedCacheHealthMonitor};
use crate::cache::provider::CacheProvider;
use crate::cache::providers::MemoryCacheService;
use crate::cache::traits::CacheService;
use crate::config::{ResilienceConfig, TieredCacheConfig};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalTierStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedTierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Configured and not degraded
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub l1: LocalTierStats,
    pub l2: SharedTierStats,
    pub l3: LocalTierStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_hits: u64,
    /// Reads that missed every tier
    pub total_misses: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TieredCacheStats {
    pub tiers: TierStats,
    pub aggregate: AggregateStats,
    pub promotions: u64,
    pub demotions: u64,
    pub degraded: bool,
    /// Keys with an access record
    pub tracked_keys: usize,
}

#[derive(Debug, Default)]
struct TierCounters {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
}

impl TierCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Degraded flag shared with the health callback
#[derive(Debug, Default)]
struct Degradation {
    degraded: AtomicBool,
    last_probe: Mutex<Option<Instant>>,
}

impl Degradation {
    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn enter(&self) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            *self.last_probe.lock() = Some(Instant::now());
            warn!("Tiered cache degraded - bypassing shared tier, writes redirected to L3");
        }
    }

    fn leave(&self) {
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!("Tiered cache recovered - shared tier back in use");
        }
    }

    /// Claim the next recovery probe if `interval` has passed since the last one
    fn claim_probe(&self, interval: Duration) -> bool {
        let mut last_probe = self.last_probe.lock();
        let now = Instant::now();
        let due = last_probe.map_or(true, |last| now.saturating_duration_since(last) >= interval);
        if due {
            *last_probe = Some(now);
        }
        due
    }
}

/// Three-tier cache with promotion, demotion and health-aware degradation
pub struct TieredCacheManager<B: CacheService = CacheProvider> {
    config: TieredCacheConfig,
    l1: MemoryCacheService,
    l2: Option<Arc<B>>,
    l3: MemoryCacheService,
    access: DashMap<String, AccessRecord>,
    /// Keys whose L2 copy may be older than a value written locally; L2 is
    /// not read for them until that copy has been removed
    stale_shared: DashSet<String>,
    degradation: Arc<Degradation>,
    health: Option<Arc<SharedCacheHealthMonitor>>,
    counters: TierCounters,
}

impl<B: CacheService> fmt::Debug for TieredCacheManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCacheManager")
            .field("l1", &self.l1)
            .field("l2", &self.l2.as_ref().map(|l2| l2.provider_name()))
            .field("l3", &self.l3)
            .field("degraded", &self.degradation.is_degraded())
            .field("tracked_keys", &self.access.len())
            .finish()
    }
}

impl TieredCacheManager<CacheProvider> {
    /// Build from configuration: connect the shared tier gracefully and attach
    /// a health monitor when it is reachable
    pub async fn from_config(config: &ResilienceConfig) -> Self {
        let provider = CacheProvider::from_config_graceful(&config.redis).await;
        if !provider.is_enabled() {
            return Self::new(config.tiered_cache.clone(), None);
        }

        let monitor = Arc::new(SharedCacheHealthMonitor::new(
            provider.provider_name(),
            config.shared_cache_health.clone(),
        ));
        Self::new(config.tiered_cache.clone(), Some(provider)).with_health_monitor(monitor)
    }
}

impl<B: CacheService> TieredCacheManager<B> {
    /// Create a manager; `shared` is the L2 backend, `None` for L1 + L3 only.
    ///
    /// An L1 TTL longer than the L2 TTL is clamped down to it.
    pub fn new(mut config: TieredCacheConfig, shared: Option<B>) -> Self {
        if config.l1_ttl_seconds > config.l2_ttl_seconds {
            warn!(
                l1_ttl_seconds = config.l1_ttl_seconds,
                l2_ttl_seconds = config.l2_ttl_seconds,
                "L1 TTL exceeds L2 TTL - clamping L1 TTL to L2 TTL"
            );
            config.l1_ttl_seconds = config.l2_ttl_seconds;
        }

        info!(
            l1_max_size = config.l1_max_size,
            l1_ttl_seconds = config.l1_ttl_seconds,
            l2 = shared.as_ref().map_or("none", |l2| l2.provider_name()),
            l3_max_size = config.l3_max_size,
            promotion_threshold = config.promotion_threshold,
            "Tiered cache initialized"
        );

        Self {
            l1: MemoryCacheService::new(config.l1_max_size, config.l1_ttl()),
            l3: MemoryCacheService::new(config.l3_max_size, config.l3_ttl()),
            l2: shared.map(Arc::new),
            config,
            access: DashMap::new(),
            stale_shared: DashSet::new(),
            degradation: Arc::new(Degradation::default()),
            health: None,
            counters: TierCounters::default(),
        }
    }

    /// Follow `monitor`: UNHEALTHY degrades the cache, HEALTHY restores it
    pub fn with_health_monitor(mut self, monitor: Arc<SharedCacheHealthMonitor>) -> Self {
        let degradation = Arc::clone(&self.degradation);
        monitor.register_callback(move |transition| {
            match transition.to {
                RedisHealthState::Unhealthy => degradation.enter(),
                RedisHealthState::Healthy => degradation.leave(),
                RedisHealthState::Unknown | RedisHealthState::Recovering => {}
            }
            Ok(())
        });

        if monitor.state() == RedisHealthState::Unhealthy {
            self.degradation.enter();
        }
        self.health = Some(monitor);
        self
    }

    /// Effective configuration, after TTL clamping
    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    pub fn health_monitor(&self) -> Option<&Arc<SharedCacheHealthMonitor>> {
        self.health.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation.is_degraded()
    }

    /// Start background probes of the shared tier, if both exist
    pub fn spawn_health_probes(&self) -> Option<JoinHandle<()>>
    where
        B: 'static,
    {
        let monitor = self.health.as_ref()?;
        let l2 = self.l2.as_ref()?;
        Some(Arc::clone(monitor).spawn(Arc::clone(l2)))
    }

    /// Read through L1, L2 (unless degraded) and L3
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = Self::read_local(&self.l1, key).await {
            TierCounters::bump(&self.counters.l1_hits);
            self.record_read(key, CacheTier::L1);
            return Some(value);
        }
        TierCounters::bump(&self.counters.l1_misses);

        if let Some(l2) = self.shared_tier().await {
            if self.shared_copy_is_current(l2, key).await {
                match l2.get(&self.l2_key(key)).await {
                    Ok(Some(value)) => {
                        TierCounters::bump(&self.counters.l2_hits);
                        self.after_lower_tier_hit(key, &value, CacheTier::L2).await;
                        return Some(value);
                    }
                    Ok(None) => TierCounters::bump(&self.counters.l2_misses),
                    Err(e) => self.shared_tier_error("get", key, &e),
                }
            }
        }

        if let Some(value) = Self::read_local(&self.l3, key).await {
            TierCounters::bump(&self.counters.l3_hits);
            self.after_lower_tier_hit(key, &value, CacheTier::L3).await;
            return Some(value);
        }
        TierCounters::bump(&self.counters.l3_misses);
        TierCounters::bump(&self.counters.misses);
        // Nothing holds the key any more
        self.access.remove(key);

        debug!(key = key, "Tiered cache MISS");
        None
    }

    /// Write `value`, by default to L2, and return the tier it landed in.
    ///
    /// Writes aimed at L2 land in L3 when the shared tier is absent, degraded
    /// or erroring. Hot keys, and keys currently living in L1, are also
    /// written to L1. `tier` pins the write to one tier. Older copies in the
    /// other tiers are removed so a later `get` sees this value.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        tier: Option<CacheTier>,
    ) -> CacheTier {
        let landed = match tier {
            Some(CacheTier::L1) => {
                self.write_local(&self.l1, key, value, ttl.unwrap_or(self.config.l1_ttl()))
                    .await;
                self.purge_shared_copy(key).await;
                CacheTier::L1
            }
            Some(CacheTier::L3) => {
                self.write_local(&self.l3, key, value, ttl.unwrap_or(self.config.l3_ttl()))
                    .await;
                self.purge_shared_copy(key).await;
                CacheTier::L3
            }
            Some(CacheTier::L2) | Some(CacheTier::None) | None => {
                self.write_shared(key, value, ttl.unwrap_or(self.config.l2_ttl()))
                    .await
            }
        };

        let mirror_to_l1 = landed != CacheTier::L1 && self.is_hot(key);
        if mirror_to_l1 {
            self.write_local(&self.l1, key, value, self.config.l1_ttl()).await;
        } else if landed != CacheTier::L1 {
            let _ = self.l1.delete(key).await;
        }
        if landed != CacheTier::L3 {
            let _ = self.l3.delete(key).await;
        }

        let current = if mirror_to_l1 { CacheTier::L1 } else { landed };
        self.access
            .entry(key.to_string())
            .and_modify(|record| record.set_tier(current))
            .or_insert_with(|| AccessRecord::new(current));

        landed
    }

    /// Remove `key` from every tier; true if any tier held it
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = self.l1.delete(key).await.unwrap_or(false);
        removed |= self.l3.delete(key).await.unwrap_or(false);

        // Attempted even while degraded so a stale shared copy cannot resurface
        if let Some(l2) = &self.l2 {
            match l2.delete(&self.l2_key(key)).await {
                Ok(existed) => {
                    removed |= existed;
                    self.stale_shared.remove(key);
                }
                Err(e) => {
                    self.shared_tier_error("delete", key, &e);
                    self.stale_shared.insert(key.to_string());
                }
            }
        }

        self.access.remove(key);
        removed
    }

    /// Whether any tier holds `key`. Does not count as an access.
    pub async fn exists(&self, key: &str) -> bool {
        if self.l1.exists(key).await.unwrap_or(false) {
            return true;
        }

        if let Some(l2) = self.shared_tier().await {
            if self.shared_copy_is_current(l2, key).await {
                match l2.exists(&self.l2_key(key)).await {
                    Ok(true) => return true,
                    Ok(false) => {}
                    Err(e) => self.shared_tier_error("exists", key, &e),
                }
            }
        }

        self.l3.exists(key).await.unwrap_or(false)
    }

    /// Tier recorded for `key`, or `CacheTier::None` if untracked
    pub fn current_tier(&self, key: &str) -> CacheTier {
        self.access
            .get(key)
            .map_or(CacheTier::None, |record| record.tier())
    }

    /// Demote L1 keys idle longer than the demotion threshold to L3, and drop
    /// access records for keys no tier holds any more. Returns how many keys
    /// were demoted.
    pub async fn run_demotion_check(&self) -> usize {
        let now = Instant::now();
        let threshold = self.config.demotion_threshold();

        let candidates: Vec<String> = self
            .access
            .iter()
            .filter(|entry| entry.tier() == CacheTier::L1 && entry.idle_for(now) >= threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let mut demoted = 0;
        for key in candidates {
            let value = Self::read_local(&self.l1, &key).await;
            let _ = self.l1.delete(&key).await;

            match value {
                Some(value) => {
                    self.write_local(&self.l3, &key, &value, self.config.l3_ttl())
                        .await;
                    if let Some(mut record) = self.access.get_mut(&key) {
                        record.set_tier(CacheTier::L3);
                    }
                    demoted += 1;
                }
                // Expired from L1 before the sweep reached it
                None if self.l3.exists(&key).await.unwrap_or(false) => {
                    if let Some(mut record) = self.access.get_mut(&key) {
                        record.set_tier(CacheTier::L3);
                    }
                }
                None => {
                    self.access.remove(&key);
                }
            }
        }

        if demoted > 0 {
            self.counters
                .demotions
                .fetch_add(demoted as u64, Ordering::Relaxed);
            info!(demoted = demoted, "Demoted idle keys from L1 to L3");
        }

        let released = self.release_expired_records(now).await;
        if released > 0 {
            debug!(released = released, "Dropped access records for expired keys");
        }
        self.purge_stale_shared_copies().await;

        demoted
    }

    /// Remove records whose key has left every tier: local keys no longer
    /// present, and shared keys idle past the longest tier TTL
    async fn release_expired_records(&self, now: Instant) -> usize {
        let longest_ttl = self
            .config
            .l1_ttl()
            .max(self.config.l2_ttl())
            .max(self.config.l3_ttl());

        let records: Vec<(String, CacheTier, Instant)> = self
            .access
            .iter()
            .map(|entry| (entry.key().clone(), entry.tier(), entry.last_access()))
            .collect();

        let mut released = 0;
        for (key, tier, last_access) in records {
            let idle_past_ttl = now.saturating_duration_since(last_access) >= longest_ttl;
            let gone = match tier {
                // Hot keys written to L3 are mirrored into L1
                CacheTier::L1 => {
                    !self.l1.exists(&key).await.unwrap_or(false)
                        && !self.l3.exists(&key).await.unwrap_or(false)
                }
                CacheTier::L3 => !self.l3.exists(&key).await.unwrap_or(false),
                CacheTier::L2 => {
                    idle_past_ttl
                        && !self.l1.exists(&key).await.unwrap_or(false)
                        && !self.l3.exists(&key).await.unwrap_or(false)
                }
                CacheTier::None => true,
            };
            // Records read or moved since the scan are kept
            let untouched = |_: &String, record: &AccessRecord| {
                record.tier() == tier && record.last_access() == last_access
            };
            if gone && self.access.remove_if(&key, untouched).is_some() {
                released += 1;
            }
        }
        released
    }

    /// Retry removal of shared copies shadowed by local writes made while the
    /// shared tier was unreachable
    async fn purge_stale_shared_copies(&self) {
        if self.stale_shared.is_empty() {
            return;
        }
        let Some(l2) = self.shared_tier().await else {
            return;
        };

        let keys: Vec<String> = self.stale_shared.iter().map(|key| key.key().clone()).collect();
        for key in keys {
            if !self.shared_copy_is_current(l2, &key).await {
                // Still marked means the delete failed; retry on the next sweep
                if self.stale_shared.contains(&key) {
                    break;
                }
            }
        }
    }

    /// Run the demotion sweep every `interval` until the handle is aborted
    pub fn spawn_maintenance(self: Arc<Self>, interval: Duration) -> JoinHandle<()>
    where
        B: 'static,
    {
        info!(
            interval_seconds = interval.as_secs(),
            "Starting tiered cache maintenance"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_demotion_check().await;
            }
        })
    }

    /// Deserialize a JSON value stored by [`set_typed`](Self::set_typed)
    pub async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get(key).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Serialize `value` as JSON and [`set`](Self::set) it
    pub async fn set_typed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tier: Option<CacheTier>,
    ) -> CacheResult<CacheTier> {
        let raw = serde_json::to_string(value)?;
        Ok(self.set(key, &raw, ttl, tier).await)
    }

    /// Drop every local entry and access record, and this manager's L2 keys
    pub async fn clear(&self) -> CacheResult<()> {
        self.l1.clear();
        self.l3.clear();
        self.access.clear();

        let Some(l2) = &self.l2 else {
            return Ok(());
        };
        if self.config.key_prefix.is_empty() {
            return Err(CacheError::BackendError(
                "refusing to clear the shared tier without a key prefix".to_string(),
            ));
        }

        let deleted = l2
            .delete_pattern(&format!("{}*", self.config.key_prefix))
            .await?;
        self.stale_shared.clear();
        info!(deleted = deleted, "Tiered cache cleared");
        Ok(())
    }

    pub async fn get_stats(&self) -> TieredCacheStats {
        self.l1.run_pending_tasks().await;
        self.l3.run_pending_tasks().await;

        let c = &self.counters;
        let l1_hits = TierCounters::load(&c.l1_hits);
        let l2_hits = TierCounters::load(&c.l2_hits);
        let l3_hits = TierCounters::load(&c.l3_hits);
        let total_hits = l1_hits + l2_hits + l3_hits;
        let total_misses = TierCounters::load(&c.misses);
        let lookups = total_hits + total_misses;
        let degraded = self.degradation.is_degraded();

        TieredCacheStats {
            tiers: TierStats {
                l1: LocalTierStats {
                    hits: l1_hits,
                    misses: TierCounters::load(&c.l1_misses),
                    size: self.l1.entry_count(),
                },
                l2: SharedTierStats {
                    hits: l2_hits,
                    misses: TierCounters::load(&c.l2_misses),
                    errors: TierCounters::load(&c.l2_errors),
                    available: self.l2.is_some() && !degraded,
                },
                l3: LocalTierStats {
                    hits: l3_hits,
                    misses: TierCounters::load(&c.l3_misses),
                    size: self.l3.entry_count(),
                },
            },
            aggregate: AggregateStats {
                total_hits,
                total_misses,
                hit_ratio: if lookups > 0 {
                    total_hits as f64 / lookups as f64
                } else {
                    0.0
                },
            },
            promotions: TierCounters::load(&c.promotions),
            demotions: TierCounters::load(&c.demotions),
            degraded,
            tracked_keys: self.access.len(),
        }
    }

    /// The shared tier, unless absent or degraded with no successful recovery probe
    async fn shared_tier(&self) -> Option<&B> {
        let l2 = self.l2.as_deref()?;
        if self.degradation.is_degraded() && !self.try_recover(l2).await {
            return None;
        }
        Some(l2)
    }

    async fn try_recover(&self, l2: &B) -> bool {
        if !self
            .degradation
            .claim_probe(self.config.recovery_interval())
        {
            return false;
        }

        let started = Instant::now();
        match l2.health_check().await {
            Ok(true) => {
                self.degradation.leave();
                if let Some(monitor) = &self.health {
                    monitor.record_success(started.elapsed());
                }
                true
            }
            Ok(false) => {
                debug!("Shared tier recovery probe failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "Shared tier recovery probe failed");
                false
            }
        }
    }

    async fn write_shared(&self, key: &str, value: &str, ttl: Duration) -> CacheTier {
        if let Some(l2) = self.shared_tier().await {
            match l2.set(&self.l2_key(key), value, ttl).await {
                Ok(()) => {
                    self.stale_shared.remove(key);
                    return CacheTier::L2;
                }
                Err(e) => self.shared_tier_error("set", key, &e),
            }
        }

        self.write_local(&self.l3, key, value, ttl).await;
        // Whatever L2 still holds for this key is now older than L3's copy
        if self.l2.is_some() {
            self.stale_shared.insert(key.to_string());
        }
        CacheTier::L3
    }

    /// After a local write, remove the older shared copy. While the shared
    /// tier is degraded or the removal fails, the key is marked so reads skip
    /// L2 for it until the copy is gone.
    async fn purge_shared_copy(&self, key: &str) {
        let Some(l2) = self.l2.as_deref() else {
            return;
        };

        if !self.degradation.is_degraded() {
            match l2.delete(&self.l2_key(key)).await {
                Ok(_) => {
                    self.stale_shared.remove(key);
                    return;
                }
                Err(e) => self.shared_tier_error("delete", key, &e),
            }
        }
        self.stale_shared.insert(key.to_string());
    }

    /// True when L2 may be read for `key`. A key marked stale has its shared
    /// copy removed first and is reported not current, since L2 then holds
    /// nothing newer than the local tiers.
    async fn shared_copy_is_current(&self, l2: &B, key: &str) -> bool {
        if !self.stale_shared.contains(key) {
            return true;
        }

        match l2.delete(&self.l2_key(key)).await {
            Ok(_) => {
                self.stale_shared.remove(key);
                debug!(key = key, "Removed shared copy superseded by a local write");
            }
            Err(e) => self.shared_tier_error("delete", key, &e),
        }
        false
    }

    async fn write_local(&self, tier: &MemoryCacheService, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = tier.set(key, value, ttl).await {
            warn!(key = key, error = %e, "Local cache write failed");
        }
    }

    async fn read_local(tier: &MemoryCacheService, key: &str) -> Option<String> {
        tier.get(key).await.ok().flatten()
    }

    /// Record a read; true if the key should be promoted into L1
    fn record_read(&self, key: &str, found_in: CacheTier) -> bool {
        let now = Instant::now();
        let mut record = self
            .access
            .entry(key.to_string())
            .or_insert_with(|| AccessRecord::new(found_in));
        record.record_access(now);
        record.set_tier(found_in);

        found_in != CacheTier::L1
            && record.frequency(now) >= self.config.promotion_threshold as usize
    }

    async fn after_lower_tier_hit(&self, key: &str, value: &str, found_in: CacheTier) {
        if !self.record_read(key, found_in) {
            return;
        }

        self.write_local(&self.l1, key, value, self.config.l1_ttl()).await;
        if let Some(mut record) = self.access.get_mut(key) {
            record.set_tier(CacheTier::L1);
        }
        TierCounters::bump(&self.counters.promotions);
        debug!(key = key, from = %found_in, "Promoted key to L1");
    }

    fn is_hot(&self, key: &str) -> bool {
        let now = Instant::now();
        self.access.get_mut(key).is_some_and(|mut record| {
            record.tier() == CacheTier::L1
                || record.frequency(now) >= self.config.promotion_threshold as usize
        })
    }

    fn shared_tier_error(&self, operation: &str, key: &str, error: &CacheError) {
        TierCounters::bump(&self.counters.l2_errors);
        warn!(
            operation = operation,
            key = key,
            error = %error,
            "Shared tier operation failed - using local tiers"
        );
        if let Some(monitor) = &self.health {
            monitor.record_failure(format!("{operation}: {error}"));
        }
    }

    fn l2_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TieredCacheConfig {
        TieredCacheConfig {
            promotion_threshold: 3,
            demotion_threshold_hours: 1.0,
            ..TieredCacheConfig::default()
        }
    }

    fn manager() -> TieredCacheManager<MemoryCacheService> {
        TieredCacheManager::new(
            config(),
            Some(MemoryCacheService::new(100, Duration::from_secs(3_600))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_write_goes_to_l2() {
        let cache = manager();
        assert_eq!(cache.set("k", "v", None, None).await, CacheTier::L2);
        assert_eq!(cache.current_tier("k"), CacheTier::L2);
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        let stats = cache.get_stats().await;
        assert_eq!(stats.tiers.l1.misses, 1);
        assert_eq!(stats.tiers.l2.hits, 1);
        assert!(stats.tiers.l2.available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_writes() {
        let cache = manager();
        assert_eq!(cache.set("a", "1", None, Some(CacheTier::L1)).await, CacheTier::L1);
        assert_eq!(cache.set("b", "2", None, Some(CacheTier::L3)).await, CacheTier::L3);

        assert_eq!(cache.get("a").await, Some("1".to_string()));
        assert_eq!(cache.get("b").await, Some("2".to_string()));

        let stats = cache.get_stats().await;
        assert_eq!(stats.tiers.l1.hits, 1);
        assert_eq!(stats.tiers.l3.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_local_write_supersedes_shared_copy() {
        let cache = manager();
        assert_eq!(cache.set("k", "v1", None, None).await, CacheTier::L2);
        assert_eq!(cache.set("k", "v2", None, Some(CacheTier::L3)).await, CacheTier::L3);

        assert_eq!(cache.get("k").await, Some("v2".to_string()));
        let shared = cache.l2.as_ref().unwrap();
        assert_eq!(shared.get("governance:cache:k").await.unwrap(), None);

        // And back again: an L2 write replaces the L3 copy
        assert_eq!(cache.set("k", "v3", None, None).await, CacheTier::L2);
        assert!(!cache.l3.exists("k").await.unwrap());
        assert_eq!(cache.get("k").await, Some("v3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_shared_tier_writes_to_l3() {
        let cache: TieredCacheManager<MemoryCacheService> = TieredCacheManager::new(config(), None);
        assert_eq!(cache.set("k", "v", None, None).await, CacheTier::L3);
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert!(!cache.get_stats().await.tiers.l2.available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_counts_once() {
        let cache = manager();
        assert_eq!(cache.get("nope").await, None);

        let stats = cache.get_stats().await;
        assert_eq!(stats.aggregate.total_misses, 1);
        assert_eq!(stats.aggregate.hit_ratio, 0.0);
        assert_eq!(stats.tracked_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_key_write_mirrors_into_l1() {
        let cache = manager();
        cache.set("hot", "v1", None, None).await;
        for _ in 0..3 {
            cache.get("hot").await;
        }
        assert_eq!(cache.current_tier("hot"), CacheTier::L1);

        // A rewrite must refresh L1 as well, or L1 would serve the old value
        cache.set("hot", "v2", None, None).await;
        assert_eq!(cache.get("hot").await, Some("v2".to_string()));
        assert_eq!(cache.current_tier("hot"), CacheTier::L1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotion_moves_idle_l1_keys_to_l3() {
        let cache = manager();
        cache.set("warm", "v", None, None).await;
        for _ in 0..3 {
            cache.get("warm").await;
        }
        assert_eq!(cache.current_tier("warm"), CacheTier::L1);

        tokio::time::advance(Duration::from_secs(1_800)).await;
        assert_eq!(cache.run_demotion_check().await, 0);

        tokio::time::advance(Duration::from_secs(1_800)).await;
        assert_eq!(cache.run_demotion_check().await, 1);
        assert_eq!(cache.current_tier("warm"), CacheTier::L3);
        assert!(!cache.l1.exists("warm").await.unwrap());
        assert!(cache.l3.exists("warm").await.unwrap());
        assert_eq!(cache.get_stats().await.demotions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_removes_every_tier_and_record() {
        let cache = manager();
        cache.set("k", "v", None, None).await;
        cache.set("k", "v", None, Some(CacheTier::L3)).await;
        cache.get("k").await;

        assert!(cache.delete("k").await);
        assert!(!cache.exists("k").await);
        assert_eq!(cache.current_tier("k"), CacheTier::None);
        assert!(!cache.delete("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_round_trip_and_bad_payload() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Verdict {
            valid: bool,
            hash: String,
        }

        let cache = manager();
        let verdict = Verdict {
            valid: true,
            hash: "abc".to_string(),
        };
        cache.set_typed("verdict", &verdict, None, None).await.unwrap();
        assert_eq!(cache.get_typed::<Verdict>("verdict").await.unwrap(), Some(verdict));

        cache.set("broken", "not json", None, None).await;
        assert!(matches!(
            cache.get_typed::<Verdict>("broken").await,
            Err(CacheError::SerializationError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_requires_prefix_for_shared_tier() {
        let cache = TieredCacheManager::new(
            TieredCacheConfig {
                key_prefix: String::new(),
                ..config()
            },
            Some(MemoryCacheService::new(10, Duration::from_secs(60))),
        );
        cache.set("k", "v", None, Some(CacheTier::L1)).await;
        assert!(cache.clear().await.is_err());
        // Local tiers are cleared regardless
        assert_eq!(cache.get_stats().await.tiers.l1.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_with_prefix() {
        let shared = MemoryCacheService::new(10, Duration::from_secs(60));
        let cache = TieredCacheManager::new(config(), Some(shared));
        cache.set("k", "v", None, None).await;
        cache.clear().await.unwrap();
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_expired_keys_release_access_records() {
        let cache: TieredCacheManager<MemoryCacheService> = TieredCacheManager::new(config(), None);
        for i in 0..50 {
            let key = format!("formula:{i}");
            cache.set(&key, "sat", Some(Duration::from_millis(50)), None).await;
            cache.get(&key).await;
        }
        cache.set("lasting", "v", None, None).await;
        assert_eq!(cache.get_stats().await.tracked_keys, 51);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.run_demotion_check().await, 0);

        assert_eq!(cache.get_stats().await.tracked_keys, 1);
        assert_eq!(cache.current_tier("lasting"), CacheTier::L3);
    }

    #[tokio::test]
    async fn test_miss_on_every_tier_drops_record() {
        let cache: TieredCacheManager<MemoryCacheService> = TieredCacheManager::new(config(), None);
        cache.set("short", "v", Some(Duration::from_millis(20)), None).await;
        assert_eq!(cache.current_tier("short"), CacheTier::L3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.current_tier("short"), CacheTier::None);
        assert_eq!(cache.get_stats().await.tracked_keys, 0);
    }
}
