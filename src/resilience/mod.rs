//! # Resilience Module
//!
//! Per-dependency guards used by every resilient adapter.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: stop calling a failing dependency for a cooldown period
//! - **Rate Limiters**: token buckets bounding calls/second to a dependency
//! - **Metrics**: breaker snapshots and registry-wide adapter aggregates
//!
//! ## Usage
//!
//! ```rust
//! use governance_resilience::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "policy_engine",
//!     CircuitBreakerConfig {
//!         failure_threshold: 2,
//!         recovery_timeout: Duration::from_secs(30),
//!         half_open_max_calls: 1,
//!     },
//! );
//!
//! breaker.record_failure();
//! breaker.record_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(breaker.try_acquire().is_err());
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, RateLimiterConfig};
pub use metrics::{
    AdapterHealth, AdapterMetrics, CircuitBreakerMetrics, SystemAdapterHealth,
    SystemAdapterMetrics,
};
pub use rate_limiter::TokenBucket;
