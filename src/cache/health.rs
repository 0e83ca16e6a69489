//! # Shared-Cache Health Monitor
//!
//! Hysteresis state machine for the shared (L2) cache endpoint:
//!
//! ```text
//! UNKNOWN ──success──> HEALTHY
//!    │                    │ unhealthy_threshold consecutive failures
//!    └──── N failures ──> UNHEALTHY <─────── any failure ──┐
//!                           │ first success                │
//!                           v                              │
//!                        RECOVERING ── healthy_threshold ──┴──> HEALTHY
//!                                     consecutive successes
//! ```
//!
//! Every transition (not every probe) invokes the registered callbacks
//! synchronously, in registration order. A callback that errors or panics is
//! logged and skipped; it never aborts the transition or reaches the prober.

use crate::cache::traits::CacheService;
use crate::config::HealthCheckConfig;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedisHealthState {
    Unknown,
    Healthy,
    Unhealthy,
    Recovering,
}

impl fmt::Display for RedisHealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedisHealthState::Unknown => write!(f, "unknown"),
            RedisHealthState::Healthy => write!(f, "healthy"),
            RedisHealthState::Unhealthy => write!(f, "unhealthy"),
            RedisHealthState::Recovering => write!(f, "recovering"),
        }
    }
}

/// Passed to callbacks on every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTransition {
    pub endpoint: String,
    pub from: RedisHealthState,
    pub to: RedisHealthState,
    pub at: DateTime<Utc>,
    /// Failure or error text that caused the transition, if any
    pub reason: Option<String>,
}

/// Transition listener
pub type HealthCallback = Arc<dyn Fn(&HealthTransition) -> anyhow::Result<()> + Send + Sync>;

/// Point-in-time view of the monitor
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub endpoint: String,
    pub state: RedisHealthState,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_latency_ms: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct HealthCounters {
    state: RedisHealthState,
    consecutive_successes: u32,
    consecutive_failures: u32,
    total_checks: u64,
    total_failures: u64,
    last_latency: Option<Duration>,
    last_check: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Health state machine for one shared-cache endpoint
pub struct SharedCacheHealthMonitor {
    endpoint: String,
    config: HealthCheckConfig,
    counters: Mutex<HealthCounters>,
    /// Held from computing a transition until its callbacks have run, so
    /// listeners see transitions in the order they happened
    delivery: Mutex<()>,
    callbacks: RwLock<Vec<HealthCallback>>,
}

impl fmt::Debug for SharedCacheHealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCacheHealthMonitor")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

impl SharedCacheHealthMonitor {
    pub fn new(endpoint: impl Into<String>, config: HealthCheckConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            counters: Mutex::new(HealthCounters {
                state: RedisHealthState::Unknown,
                consecutive_successes: 0,
                consecutive_failures: 0,
                total_checks: 0,
                total_failures: 0,
                last_latency: None,
                last_check: None,
                last_error: None,
            }),
            delivery: Mutex::new(()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn state(&self) -> RedisHealthState {
        self.counters.lock().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == RedisHealthState::Healthy
    }

    /// Register a transition listener; listeners run in registration order.
    ///
    /// Listeners must not record outcomes on this monitor: delivery is
    /// serialized and such a call would deadlock.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&HealthTransition) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Record a successful probe
    pub fn record_success(&self, latency: Duration) -> RedisHealthState {
        let _delivery = self.delivery.lock();
        let transition = {
            let mut counters = self.counters.lock();
            counters.total_checks += 1;
            counters.consecutive_failures = 0;
            counters.consecutive_successes = counters.consecutive_successes.saturating_add(1);
            counters.last_latency = Some(latency);
            counters.last_check = Some(Utc::now());

            // The success that leaves UNHEALTHY counts toward healthy_threshold
            let next = match counters.state {
                RedisHealthState::Unknown => RedisHealthState::Healthy,
                RedisHealthState::Unhealthy => {
                    if counters.consecutive_successes >= self.config.healthy_threshold {
                        RedisHealthState::Healthy
                    } else {
                        RedisHealthState::Recovering
                    }
                }
                RedisHealthState::Recovering
                    if counters.consecutive_successes >= self.config.healthy_threshold =>
                {
                    RedisHealthState::Healthy
                }
                current => current,
            };
            self.apply(&mut counters, next, None)
        };

        debug!(
            endpoint = %self.endpoint,
            latency_ms = latency.as_secs_f64() * 1_000.0,
            "Shared cache probe succeeded"
        );
        self.finish(transition)
    }

    /// Record a failed probe or data-path error
    pub fn record_failure(&self, reason: impl Into<String>) -> RedisHealthState {
        let reason = reason.into();
        let _delivery = self.delivery.lock();
        let transition = {
            let mut counters = self.counters.lock();
            counters.total_checks += 1;
            counters.total_failures += 1;
            counters.consecutive_successes = 0;
            counters.consecutive_failures = counters.consecutive_failures.saturating_add(1);
            counters.last_check = Some(Utc::now());
            counters.last_error = Some(reason.clone());

            let next = match counters.state {
                RedisHealthState::Recovering => RedisHealthState::Unhealthy,
                RedisHealthState::Unknown | RedisHealthState::Healthy
                    if counters.consecutive_failures >= self.config.unhealthy_threshold =>
                {
                    RedisHealthState::Unhealthy
                }
                current => current,
            };
            self.apply(&mut counters, next, Some(reason.clone()))
        };

        warn!(
            endpoint = %self.endpoint,
            reason = %reason,
            "Shared cache probe failed"
        );
        self.finish(transition)
    }

    /// Administrative override; fires callbacks if the state changes
    pub fn force_state(&self, state: RedisHealthState) -> RedisHealthState {
        let _delivery = self.delivery.lock();
        let transition = {
            let mut counters = self.counters.lock();
            counters.consecutive_successes = 0;
            counters.consecutive_failures = 0;
            self.apply(&mut counters, state, Some("forced".to_string()))
        };
        warn!(endpoint = %self.endpoint, state = %state, "Shared cache health forced");
        self.finish(transition)
    }

    /// Probe `backend` once, bounded by `probe_timeout_ms`
    pub async fn check_health<B: CacheService>(&self, backend: &B) -> RedisHealthState {
        let started = Instant::now();
        match tokio::time::timeout(self.config.probe_timeout(), backend.health_check()).await {
            Ok(Ok(true)) => self.record_success(started.elapsed()),
            Ok(Ok(false)) => self.record_failure("unexpected probe response"),
            Ok(Err(e)) => self.record_failure(e.to_string()),
            Err(_) => self.record_failure(format!(
                "probe timed out after {}ms",
                self.config.probe_timeout_ms
            )),
        }
    }

    /// Probe `backend` every `check_interval_seconds` until the handle is aborted
    pub fn spawn<B>(self: Arc<Self>, backend: Arc<B>) -> JoinHandle<()>
    where
        B: CacheService + 'static,
    {
        let interval = self.config.check_interval();
        info!(
            endpoint = %self.endpoint,
            interval_seconds = interval.as_secs(),
            "Starting shared cache health probes"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_health(backend.as_ref()).await;
            }
        })
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let counters = self.counters.lock();
        HealthSnapshot {
            endpoint: self.endpoint.clone(),
            state: counters.state,
            consecutive_successes: counters.consecutive_successes,
            consecutive_failures: counters.consecutive_failures,
            total_checks: counters.total_checks,
            total_failures: counters.total_failures,
            last_latency_ms: counters.last_latency.map(|l| l.as_secs_f64() * 1_000.0),
            last_check: counters.last_check,
            last_error: counters.last_error.clone(),
        }
    }

    fn apply(
        &self,
        counters: &mut HealthCounters,
        next: RedisHealthState,
        reason: Option<String>,
    ) -> Option<HealthTransition> {
        if counters.state == next {
            return None;
        }
        let from = counters.state;
        counters.state = next;
        Some(HealthTransition {
            endpoint: self.endpoint.clone(),
            from,
            to: next,
            at: Utc::now(),
            reason,
        })
    }

    /// Fire callbacks outside the counters lock (but under the delivery lock)
    /// and return the resulting state
    fn finish(&self, transition: Option<HealthTransition>) -> RedisHealthState {
        let Some(transition) = transition else {
            return self.state();
        };

        info!(
            endpoint = %transition.endpoint,
            from = %transition.from,
            to = %transition.to,
            "Shared cache health transition"
        );

        let callbacks: Vec<HealthCallback> = self.callbacks.read().clone();
        for (index, callback) in callbacks.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(&transition))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    endpoint = %transition.endpoint,
                    callback = index,
                    error = %e,
                    "Health callback failed"
                ),
                Err(_) => error!(
                    endpoint = %transition.endpoint,
                    callback = index,
                    "Health callback panicked"
                ),
            }
        }

        transition.to
    }
}
