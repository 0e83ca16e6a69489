//! # Tiered Cache
//!
//! A three-tier cache (process-local L1, shared L2, process-local L3) with
//! frequency-based promotion, idle demotion, and automatic degradation when
//! the shared tier's health monitor reports it unhealthy.
//!
//! Backends implement [`CacheService`]; [`CacheProvider`] dispatches over the
//! built-in ones (Redis, in-memory, no-op).

pub mod access;
pub mod errors;
pub mod health;
pub mod provider;
pub mod providers;
pub mod tiered;
pub mod traits;

pub use access::{AccessRecord, CacheTier, ACCESS_WINDOW};
pub use errors::{CacheError, CacheResult};
pub use health::{
    HealthCallback, HealthSnapshot, HealthTransition, RedisHealthState, SharedCacheHealthMonitor,
};
pub use provider::CacheProvider;
pub use providers::{MemoryCacheService, NoOpCacheService};
pub use tiered::{
    AggregateStats, LocalTierStats, SharedTierStats, TierStats, TieredCacheManager,
    TieredCacheStats,
};
pub use traits::CacheService;

#[cfg(feature = "cache-redis")]
pub use providers::RedisCacheService;
