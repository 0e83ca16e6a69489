//! Shared-tier cache provider
//!
//! Uses enum dispatch for zero-cost abstraction over the concrete backends.
//! Construction is graceful: a shared cache that is disabled or unreachable
//! at startup yields a NoOp provider, never a startup failure.

use super::errors::CacheResult;
use super::providers::{MemoryCacheService, NoOpCacheService};
use super::traits::CacheService;
use crate::config::RedisConfig;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisCacheService;

/// Backend for the shared (L2) cache tier
#[derive(Debug, Clone)]
pub enum CacheProvider {
    /// Redis cache provider (boxed to reduce enum size)
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisCacheService>),

    /// Process-local stand-in for single-instance deployments
    Memory(MemoryCacheService),

    /// No-op cache provider (always miss, always succeed)
    NoOp(NoOpCacheService),
}

impl CacheProvider {
    /// Create a provider from configuration with graceful degradation
    ///
    /// If Redis is configured but fails to connect, logs a warning and
    /// returns a NoOp provider instead.
    pub async fn from_config_graceful(config: &RedisConfig) -> Self {
        if !config.enabled {
            info!("Shared cache disabled by configuration");
            return Self::NoOp(NoOpCacheService::new());
        }

        Self::create_redis_backend(config).await
    }

    #[cfg(feature = "cache-redis")]
    async fn create_redis_backend(config: &RedisConfig) -> Self {
        match RedisCacheService::from_config(config).await {
            Ok(service) => {
                info!(
                    url = %super::providers::redis::redact_url(&config.url),
                    "Shared cache connected"
                );
                Self::Redis(Box::new(service))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to shared cache - running without L2"
                );
                Self::NoOp(NoOpCacheService::new())
            }
        }
    }

    #[cfg(not(feature = "cache-redis"))]
    async fn create_redis_backend(_config: &RedisConfig) -> Self {
        warn!("Shared cache enabled but the cache-redis feature is not compiled in - running without L2");
        Self::NoOp(NoOpCacheService::new())
    }

    /// In-memory provider
    pub fn memory(max_capacity: u64, max_ttl: Duration) -> Self {
        Self::Memory(MemoryCacheService::new(max_capacity, max_ttl))
    }

    /// Disabled provider
    pub fn noop() -> Self {
        Self::NoOp(NoOpCacheService::new())
    }

    /// False for the NoOp provider
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }
}

impl CacheService for CacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.exists(key).await,
            Self::Memory(s) => s.exists(key).await,
            Self::NoOp(s) => s.exists(key).await,
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete_pattern(pattern).await,
            Self::Memory(s) => s.delete_pattern(pattern).await,
            Self::NoOp(s) => s.delete_pattern(pattern).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.is_distributed(),
            Self::Memory(s) => s.is_distributed(),
            Self::NoOp(s) => s.is_distributed(),
        }
    }
}
