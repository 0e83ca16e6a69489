#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Governance Resilience
//!
//! Fault-tolerance substrate for a governance system that calls out to an SMT
//! satisfiability solver and a policy decision engine.
//!
//! ## Overview
//!
//! Every external call goes through a [`ResilientAdapter`] that composes, per
//! dependency:
//!
//! - a response cache keyed by the request,
//! - a token-bucket rate limiter,
//! - a circuit breaker (CLOSED / OPEN / HALF_OPEN),
//! - a per-attempt timeout with exponential backoff retries,
//! - a typed fallback (solver: `unknown`; policy engine: deny unless fail-open).
//!
//! Callers never see a raised error from an adapter call: every outcome is an
//! [`AdapterResult`] carrying either a payload or an error plus latency and
//! cache/fallback/retry flags.
//!
//! Alongside the adapters sits a [`TieredCacheManager`]: a process-local L1, a
//! shared L2 (Redis) and a process-local L3 fallback, with frequency-based
//! promotion, idle demotion and degradation driven by a
//! [`SharedCacheHealthMonitor`].
//!
//! ## Module Organization
//!
//! - [`adapters`] - adapter contract, resilient wrapper, concrete adapters, registry
//! - [`resilience`] - circuit breaker, token bucket, metrics snapshots
//! - [`cache`] - cache backends, tiered manager, shared-tier health monitor
//! - [`config`] - TOML + environment configuration
//! - [`error`] - structured error handling
//! - [`logging`] - tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use governance_resilience::{AdapterRegistry, ResilienceConfig, TieredCacheManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResilienceConfig::load(None)?;
//! governance_resilience::logging::init_structured_logging(&config.logging);
//!
//! let registry = AdapterRegistry::new();
//! let cache = TieredCacheManager::from_config(&config).await;
//! let _probes = cache.spawn_health_probes();
//!
//! cache.set("constitution:hash", "a1b2c3", None, None).await;
//! assert!(cache.get("constitution:hash").await.is_some());
//!
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;

pub use adapters::{
    AdapterConfig, AdapterError, AdapterRegistry, AdapterResult, AdapterService, ManagedAdapter,
    PolicyDecisionAdapter, ResilientAdapter, SatisfiabilityAdapter, ServiceError,
};
pub use cache::{
    CacheError, CacheProvider, CacheService, CacheTier, SharedCacheHealthMonitor,
    TieredCacheManager,
};
pub use config::{ConfigurationError, ResilienceConfig};
pub use error::{RegistryError, ResilienceError, Result};
pub use resilience::{CircuitBreaker, CircuitState, TokenBucket};
