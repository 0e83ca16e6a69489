//! # Resilience Configuration
//!
//! Configuration is read once at construction and never mutated in place.
//! Sources, in increasing precedence:
//!
//! 1. Built-in production defaults (every section is `#[serde(default)]`)
//! 2. An optional TOML file
//! 3. Environment overrides: `RESILIENCE__<SECTION>__<FIELD>`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use governance_resilience::config::ResilienceConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResilienceConfig::load(Some(Path::new("config/resilience.toml")))?;
//! let policy = config.config_for_adapter("policy_engine");
//! assert!(policy.backoff_multiplier > 1.0);
//! # Ok(())
//! # }
//! ```

pub mod error;

use crate::adapters::AdapterConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use error::{ConfigResult, ConfigurationError};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Logging bootstrap settings
    pub logging: LoggingConfig,

    /// Settings for adapters without a named override
    pub adapter_defaults: AdapterConfig,

    /// Named adapter overrides
    pub adapters: HashMap<String, AdapterConfig>,

    /// Tier sizes, TTLs and promotion/demotion policy
    pub tiered_cache: TieredCacheConfig,

    /// Shared cache (L2) endpoint
    pub redis: RedisConfig,

    /// Shared cache health state machine
    pub shared_cache_health: HealthCheckConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `info`, `governance_resilience=debug`); environment default when unset
    pub level: Option<String>,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Tiered cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredCacheConfig {
    /// L1 (process-local) entry limit
    pub l1_max_size: u64,
    /// L1 entry lifetime; clamped to `l2_ttl_seconds` at construction
    pub l1_ttl_seconds: u64,
    /// Default L2 (shared) entry lifetime
    pub l2_ttl_seconds: u64,
    /// L3 (local fallback) entry limit
    pub l3_max_size: u64,
    /// L3 entry lifetime
    pub l3_ttl_seconds: u64,
    /// Reads per trailing minute that promote a key into L1
    pub promotion_threshold: u32,
    /// L1 keys idle this long are demoted to L3
    pub demotion_threshold_hours: f64,
    /// How long a degraded cache waits before probing L2 again
    pub recovery_interval_seconds: u64,
    /// Cadence of the background demotion sweep
    pub demotion_check_interval_seconds: u64,
    /// Prefix applied to every L2 key
    pub key_prefix: String,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            l1_max_size: 1_000,
            l1_ttl_seconds: 300,
            l2_ttl_seconds: 3_600,
            l3_max_size: 10_000,
            l3_ttl_seconds: 3_600,
            promotion_threshold: 10,
            demotion_threshold_hours: 1.0,
            recovery_interval_seconds: 30,
            demotion_check_interval_seconds: 300,
            key_prefix: "governance:cache:".to_string(),
        }
    }
}

impl TieredCacheConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_seconds)
    }

    pub fn l3_ttl(&self) -> Duration {
        Duration::from_secs(self.l3_ttl_seconds)
    }

    /// Idle time before an L1 key is demoted; saturates for values too large to represent
    pub fn demotion_threshold(&self) -> Duration {
        Duration::try_from_secs_f64(self.demotion_threshold_hours * 3_600.0)
            .unwrap_or(Duration::MAX)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_seconds)
    }

    pub fn demotion_check_interval(&self) -> Duration {
        Duration::from_secs(self.demotion_check_interval_seconds)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("l1_max_size", self.l1_max_size),
            ("l1_ttl_seconds", self.l1_ttl_seconds),
            ("l2_ttl_seconds", self.l2_ttl_seconds),
            ("l3_max_size", self.l3_max_size),
            ("l3_ttl_seconds", self.l3_ttl_seconds),
            ("demotion_check_interval_seconds", self.demotion_check_interval_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than 0",
                ));
            }
        }

        if self.promotion_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "promotion_threshold",
                self.promotion_threshold,
                "must be greater than 0",
            ));
        }

        if Duration::try_from_secs_f64(self.demotion_threshold_hours * 3_600.0).is_err() {
            return Err(ConfigurationError::invalid_value(
                "demotion_threshold_hours",
                self.demotion_threshold_hours,
                "must be a non-negative number of representable size",
            ));
        }

        Ok(())
    }
}

/// Shared cache endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Set false to run with L1 + L3 only
    pub enabled: bool,
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Client-level bound on every GET/SET/EXISTS/DEL
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379/0".to_string(),
            connect_timeout_ms: 2_000,
            command_timeout_ms: 500,
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ConfigResult<()> {
        if self.enabled
            && !(self.url.starts_with("redis://")
                || self.url.starts_with("rediss://")
                || self.url.starts_with("unix://"))
        {
            return Err(ConfigurationError::invalid_value(
                "redis.url",
                "[redacted]",
                "must use the redis://, rediss:// or unix:// scheme",
            ));
        }

        if self.command_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ConfigurationError::validation(
                "redis",
                "connect and command timeouts must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Shared cache health state machine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Interval between background liveness probes
    pub check_interval_seconds: u64,
    /// Deadline for one probe
    pub probe_timeout_ms: u64,
    /// Consecutive failures that mark the endpoint unhealthy
    pub unhealthy_threshold: u32,
    /// Consecutive successes that mark a recovering endpoint healthy
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 10,
            probe_timeout_ms: 1_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> ConfigResult<()> {
        if self.unhealthy_threshold == 0 || self.healthy_threshold == 0 {
            return Err(ConfigurationError::validation(
                "shared_cache_health",
                "unhealthy_threshold and healthy_threshold must be at least 1",
            ));
        }

        if self.check_interval_seconds == 0 || self.probe_timeout_ms == 0 {
            return Err(ConfigurationError::validation(
                "shared_cache_health",
                "check_interval_seconds and probe_timeout_ms must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl ResilienceConfig {
    /// Prefix for environment overrides
    pub const ENV_PREFIX: &'static str = "RESILIENCE";

    /// Load from an optional TOML file plus environment overrides, then validate
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading resilience configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(Self::environment_source());

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            adapters = config.adapters.len(),
            redis_enabled = config.redis.enabled,
            "Resilience configuration loaded"
        );

        Ok(config)
    }

    /// Parse TOML text (no environment overrides), then validate
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment_source() -> config::Environment {
        config::Environment::with_prefix(Self::ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Configuration for a named adapter: the override if present, else the defaults
    pub fn config_for_adapter(&self, name: &str) -> AdapterConfig {
        self.adapters
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.adapter_defaults.clone())
    }

    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.adapter_defaults.validate()?;
        for (name, adapter) in &self.adapters {
            adapter.validate().map_err(|err| {
                ConfigurationError::validation(format!("adapters.{name}"), err.to_string())
            })?;
        }
        self.tiered_cache.validate()?;
        self.redis.validate()?;
        self.shared_cache_health.validate()?;
        Ok(())
    }
}
