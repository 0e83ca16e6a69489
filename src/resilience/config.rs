//! # Circuit Breaker and Rate Limiter Configuration
//!
//! Runtime configuration structs consumed by [`CircuitBreaker`](super::CircuitBreaker)
//! and [`TokenBucket`](super::TokenBucket). The serde-facing, file-loaded form of
//! these settings lives on `AdapterConfig`, which converts into these types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure count (in the closed state) that opens the circuit
    pub failure_threshold: u32,

    /// Time to wait in open state before allowing probe calls
    pub recovery_timeout: Duration,

    /// Probe budget in half-open state; this many successes close the circuit
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Breaker tuned for advisory verifiers (solvers) that are slow but rarely down
    pub fn for_verifier() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }

    /// Breaker tuned for security-relevant decision engines
    pub fn for_policy_engine() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(15),
            half_open_max_calls: 2,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".to_string());
        }

        if self.half_open_max_calls > 50 {
            return Err("half_open_max_calls should not exceed 50".to_string());
        }

        if self.recovery_timeout > Duration::from_secs(3600) {
            return Err("recovery_timeout should not exceed 3600 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Token bucket parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Tokens added per second
    pub rate_per_second: f64,

    /// Bucket capacity (maximum burst)
    pub burst: u32,
}

impl RateLimiterConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !(self.rate_per_second.is_finite() && self.rate_per_second > 0.0) {
            return Err("rate_per_second must be a positive number".to_string());
        }

        if self.burst == 0 {
            return Err("burst must be at least 1".to_string());
        }

        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate_per_second: 100.0,
            burst: 20,
        }
    }
}
