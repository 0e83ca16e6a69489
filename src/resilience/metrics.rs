//! # Resilience Metrics
//!
//! Snapshot types for circuit breakers and resilient adapters, plus the
//! system-wide aggregates the adapter registry reports.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of recorded outcomes
    pub total_calls: u64,

    /// Number of successful calls
    pub success_count: u64,

    /// Number of failed calls
    pub failure_count: u64,

    /// Calls refused because the circuit was open or the probe budget was spent
    pub rejected_calls: u64,

    /// How many times the circuit has opened
    pub times_opened: u64,

    /// Closed-state failure counter at snapshot time
    pub current_failures: u32,

    /// Total duration of all recorded operations
    pub total_duration: Duration,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    /// Average operation duration
    pub average_duration: Duration,

    /// Remaining open time (zero unless open)
    pub time_until_recovery: Duration,
}

impl CircuitBreakerMetrics {
    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_calls,
            self.average_duration.as_millis()
        )
    }
}

/// Cumulative call counters for one resilient adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterMetrics {
    /// Calls made through `call()`
    pub total_calls: u64,

    /// Calls that returned `success=true` (including cache hits and fallbacks)
    pub successful_calls: u64,

    /// Calls that returned `success=false` or were cancelled mid-flight
    pub failed_calls: u64,

    /// Calls answered from the adapter cache
    pub cache_hits: u64,

    /// Calls answered with the fallback value
    pub fallback_uses: u64,

    /// Retry attempts beyond the first
    pub retries: u64,

    /// Attempts that exceeded the call timeout
    pub timeouts: u64,

    /// Attempts refused by the rate limiter
    pub rate_limited: u64,

    /// Calls refused by an open circuit
    pub circuit_rejections: u64,

    /// Mean wall-clock latency of completed calls, in milliseconds
    pub average_latency_ms: f64,
}

impl AdapterMetrics {
    /// Add another adapter's counters into this one
    pub fn accumulate(&mut self, other: &AdapterMetrics) {
        let combined_calls = self.total_calls + other.total_calls;
        if combined_calls > 0 {
            self.average_latency_ms = (self.average_latency_ms * self.total_calls as f64
                + other.average_latency_ms * other.total_calls as f64)
                / combined_calls as f64;
        }

        self.total_calls = combined_calls;
        self.successful_calls += other.successful_calls;
        self.failed_calls += other.failed_calls;
        self.cache_hits += other.cache_hits;
        self.fallback_uses += other.fallback_uses;
        self.retries += other.retries;
        self.timeouts += other.timeouts;
        self.rate_limited += other.rate_limited;
        self.circuit_rejections += other.circuit_rejections;
    }

    /// Share of calls answered from cache
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.total_calls as f64
    }
}

/// Health view of one adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterHealth {
    /// Adapter name
    pub name: String,

    /// Circuit not open and backend present
    pub healthy: bool,

    /// Circuit breaker state
    pub state: CircuitState,

    /// Last time a call reached the dependency
    pub last_check: Option<DateTime<Utc>>,

    /// Remaining open time, in milliseconds
    pub time_until_recovery_ms: u64,

    /// False once the backend has been found missing
    pub backend_available: bool,
}

/// Registry-wide metrics: per-adapter snapshots plus summed counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemAdapterMetrics {
    /// Per-adapter metrics by name
    pub adapters: HashMap<String, AdapterMetrics>,

    /// Sum of every adapter's counters
    pub totals: AdapterMetrics,
}

impl SystemAdapterMetrics {
    /// Add one adapter's metrics
    pub fn add_adapter(&mut self, name: String, metrics: AdapterMetrics) {
        self.totals.accumulate(&metrics);
        self.adapters.insert(name, metrics);
    }
}

/// Registry-wide health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemAdapterHealth {
    /// Per-adapter health by name
    pub adapters: HashMap<String, AdapterHealth>,

    /// Number of healthy adapters
    pub healthy_count: usize,

    /// Number of registered adapters
    pub total_count: usize,

    /// `healthy_count / total_count` (1.0 when empty)
    pub health_score: f64,

    /// True when every adapter is healthy
    pub healthy: bool,

    /// When the snapshot was taken
    pub collected_at: DateTime<Utc>,
}

impl SystemAdapterHealth {
    /// Build the aggregate from per-adapter health
    pub fn from_adapters(adapters: HashMap<String, AdapterHealth>) -> Self {
        let total_count = adapters.len();
        let healthy_count = adapters.values().filter(|health| health.healthy).count();
        let health_score = if total_count == 0 {
            1.0
        } else {
            healthy_count as f64 / total_count as f64
        };

        Self {
            adapters,
            healthy_count,
            total_count,
            health_score,
            healthy: healthy_count == total_count,
            collected_at: Utc::now(),
        }
    }

    /// Count adapters by circuit state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for health in self.adapters.values() {
            *counts.entry(health.state).or_insert(0) += 1;
        }
        counts
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        format!(
            "Adapters: {} total | {} closed | {} open | {} half-open | Health: {:.1}%",
            self.total_count,
            state_counts.get(&CircuitState::Closed).unwrap_or(&0),
            state_counts.get(&CircuitState::Open).unwrap_or(&0),
            state_counts.get(&CircuitState::HalfOpen).unwrap_or(&0),
            self.health_score * 100.0
        )
    }
}
