//! Per-adapter configuration.

use crate::config::ConfigurationError;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable configuration for one resilient adapter.
///
/// Read once at construction. Durations are stored as plain numbers so the
/// struct maps one-to-one onto TOML and environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Deadline for one attempt
    pub timeout_ms: u64,
    /// Deadline for establishing a connection to the dependency
    pub connect_timeout_ms: u64,
    /// Attempts beyond the first
    pub max_retries: u32,
    /// First retry delay
    pub backoff_base_ms: u64,
    /// Retry delay cap
    pub backoff_max_ms: u64,
    /// Growth factor between retry delays; must be > 1
    pub backoff_multiplier: f64,
    /// Closed-state failures that open the circuit
    pub circuit_failure_threshold: u32,
    /// Open-state cooldown before probe calls are admitted
    pub circuit_recovery_timeout_seconds: f64,
    /// Probe budget while half-open
    pub half_open_max_calls: u32,
    /// Token refill rate
    pub rate_limit_per_second: f64,
    /// Token bucket capacity
    pub rate_limit_burst: u32,
    /// Whether successful responses are cached
    pub cache_enabled: bool,
    /// Cached response lifetime
    pub cache_ttl_seconds: u64,
    /// Maximum cached responses
    pub cache_max_entries: u64,
    /// Whether the service fallback replaces errors
    pub fallback_enabled: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            backoff_multiplier: 2.0,
            circuit_failure_threshold: 5,
            circuit_recovery_timeout_seconds: 30.0,
            half_open_max_calls: 3,
            rate_limit_per_second: 100.0,
            rate_limit_burst: 20,
            cache_enabled: true,
            cache_ttl_seconds: 300,
            cache_max_entries: 10_000,
            fallback_enabled: true,
        }
    }
}

impl AdapterConfig {
    /// Defaults for SMT solvers: deterministic answers, so a long cache TTL
    pub fn for_satisfiability() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 1,
            cache_ttl_seconds: 3_600,
            rate_limit_per_second: 20.0,
            rate_limit_burst: 10,
            ..Self::default()
        }
    }

    /// Defaults for policy-decision engines: short TTL, quick failover
    pub fn for_policy_engine() -> Self {
        Self {
            timeout_ms: 1_000,
            max_retries: 2,
            backoff_base_ms: 50,
            backoff_max_ms: 1_000,
            circuit_failure_threshold: 3,
            circuit_recovery_timeout_seconds: 15.0,
            half_open_max_calls: 2,
            cache_ttl_seconds: 60,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Delay before retry number `attempt` (0-based): `base * multiplier^attempt`, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.backoff_base_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.backoff_max_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Recovery timeout as a `Duration`; saturates for values too large to represent
    pub fn circuit_recovery_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.circuit_recovery_timeout_seconds).unwrap_or(Duration::MAX)
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: self.circuit_recovery_timeout(),
            half_open_max_calls: self.half_open_max_calls,
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            rate_per_second: self.rate_limit_per_second,
            burst: self.rate_limit_burst,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 1.0) {
            return Err(ConfigurationError::invalid_value(
                "backoff_multiplier",
                self.backoff_multiplier,
                "must be greater than 1",
            ));
        }

        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff_base_ms",
                self.backoff_base_ms,
                format!("must not exceed backoff_max_ms ({})", self.backoff_max_ms),
            ));
        }

        if Duration::try_from_secs_f64(self.circuit_recovery_timeout_seconds).is_err() {
            return Err(ConfigurationError::invalid_value(
                "circuit_recovery_timeout_seconds",
                self.circuit_recovery_timeout_seconds,
                "must be a non-negative number of representable size",
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "timeout_ms",
                self.timeout_ms,
                "must be greater than 0",
            ));
        }

        if self.cache_enabled && self.cache_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache_ttl_seconds",
                self.cache_ttl_seconds,
                "must be greater than 0 when caching is enabled",
            ));
        }

        self.circuit_breaker_config()
            .validate()
            .map_err(|reason| ConfigurationError::validation("circuit_breaker", reason))?;
        self.rate_limiter_config()
            .validate()
            .map_err(|reason| ConfigurationError::validation("rate_limiter", reason))?;

        Ok(())
    }
}
