//! # Circuit Breaker Implementation
//!
//! Per-dependency state machine deciding whether new calls are permitted.
//! Three states: Closed (normal operation), Open (failing fast), and Half-Open
//! (a bounded number of probe calls test recovery).
//!
//! The Open -> Half-Open transition is lazy: it is computed from elapsed time
//! whenever the state is read, so there is no background timer. All time is
//! measured with `tokio::time::Instant`, which lets tests drive the breaker
//! with a paused clock.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Lock-free counters for breaker activity.
///
/// These only feed observability; the state machine itself lives behind the
/// `transitions` mutex.
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_calls: AtomicU64,
    times_opened: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.rejected_calls.store(0, Ordering::Relaxed);
        self.times_opened.store(0, Ordering::Relaxed);
        self.total_duration_nanos.store(0, Ordering::Relaxed);
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - limited calls allowed to test system health
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Mutable part of the state machine. Every transition happens under one lock.
#[derive(Debug)]
struct Transitions {
    state: CircuitState,
    /// Closed-state failure counter; successes decrement it (floor 0)
    failure_count: u32,
    /// Probe permits handed out since entering half-open
    half_open_permits: u32,
    /// Probe successes since entering half-open
    half_open_successes: u32,
    /// When the circuit last opened
    opened_at: Option<Instant>,
}

impl Transitions {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_permits: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// State machine, guarded by a short in-memory critical section
    transitions: Mutex<Transitions>,

    /// Lock-free atomic metrics
    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            half_open_max_calls = config.half_open_max_calls,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            transitions: Mutex::new(Transitions::closed()),
            metrics: AtomicCircuitBreakerMetrics::new(),
        }
    }

    /// Get current circuit state.
    ///
    /// Reading the state of an open circuit whose recovery timeout has elapsed
    /// moves it to half-open.
    pub fn state(&self) -> CircuitState {
        let mut transitions = self.transitions.lock();
        self.refresh(&mut transitions);
        transitions.state
    }

    /// Time remaining before an open circuit starts admitting probe calls.
    ///
    /// Zero whenever the circuit is not open.
    pub fn time_until_recovery(&self) -> Duration {
        let mut transitions = self.transitions.lock();
        self.refresh(&mut transitions);
        self.remaining_open_time(&transitions)
    }

    /// Ask for permission to make one call.
    ///
    /// Returns `Err(retry_after)` when the circuit rejects the call: either it is
    /// open, or it is half-open and the probe budget is spent.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut transitions = self.transitions.lock();
        self.refresh(&mut transitions);

        let decision = match transitions.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(self.remaining_open_time(&transitions)),
            CircuitState::HalfOpen => {
                if transitions.half_open_permits < self.config.half_open_max_calls {
                    transitions.half_open_permits += 1;
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            }
        };

        if decision.is_err() {
            self.metrics.rejected_calls.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    /// Hand back a permit from [`try_acquire`](Self::try_acquire) for a call
    /// that ended without a success or failure to record.
    ///
    /// Only half-open permits are counted, so this is a no-op in other states.
    pub fn release_permit(&self) {
        let mut transitions = self.transitions.lock();
        if transitions.state == CircuitState::HalfOpen {
            transitions.half_open_permits = transitions.half_open_permits.saturating_sub(1);
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.record_success_after(Duration::ZERO);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.record_failure_after(Duration::ZERO);
    }

    /// Record a successful operation that took `duration`
    pub fn record_success_after(&self, duration: Duration) {
        self.metrics.record_success(duration);

        debug!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation succeeded"
        );

        let mut transitions = self.transitions.lock();
        self.refresh(&mut transitions);

        match transitions.state {
            CircuitState::Closed => {
                transitions.failure_count = transitions.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                transitions.half_open_successes += 1;
                if transitions.half_open_successes >= self.config.half_open_max_calls {
                    self.transition_to_closed(&mut transitions);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation that took `duration`
    pub fn record_failure_after(&self, duration: Duration) {
        self.metrics.record_failure(duration);

        warn!(
            component = %self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation failed"
        );

        let mut transitions = self.transitions.lock();
        self.refresh(&mut transitions);

        match transitions.state {
            CircuitState::Closed => {
                transitions.failure_count += 1;
                if transitions.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(&mut transitions);
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens the circuit and restarts the timer
                self.transition_to_open(&mut transitions);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit closed with zero counters (administrative recovery)
    pub fn reset(&self) {
        warn!(component = %self.name, "Circuit breaker reset");
        let mut transitions = self.transitions.lock();
        self.transition_to_closed(&mut transitions);
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let mut transitions = self.transitions.lock();
        self.transition_to_open(&mut transitions);
    }

    /// Clear the accumulated call counters without touching the state machine
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, current_failures, time_until_recovery) = {
            let mut transitions = self.transitions.lock();
            self.refresh(&mut transitions);
            (
                transitions.state,
                transitions.failure_count,
                self.remaining_open_time(&transitions),
            )
        };

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        let success_count = self.metrics.success_count.load(Ordering::Relaxed);
        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.metrics.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_calls: self.metrics.rejected_calls.load(Ordering::Relaxed),
            times_opened: self.metrics.times_opened.load(Ordering::Relaxed),
            current_failures,
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
            time_until_recovery,
        }
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        if self.state() != CircuitState::Closed {
            return false;
        }

        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        if total_calls < 10 {
            // Too few calls to determine health
            return true;
        }

        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        let failure_rate = failure_count as f64 / total_calls as f64;
        failure_rate < 0.5
    }

    /// Apply the time-based Open -> Half-Open transition if it is due
    fn refresh(&self, transitions: &mut Transitions) {
        if transitions.state != CircuitState::Open {
            return;
        }

        let due = transitions
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);

        if due {
            transitions.state = CircuitState::HalfOpen;
            transitions.half_open_permits = 0;
            transitions.half_open_successes = 0;

            info!(
                component = %self.name,
                half_open_max_calls = self.config.half_open_max_calls,
                "Circuit breaker half-open (testing recovery)"
            );
        }
    }

    fn remaining_open_time(&self, transitions: &Transitions) -> Duration {
        match (transitions.state, transitions.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                self.config.recovery_timeout.saturating_sub(opened.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    fn transition_to_closed(&self, transitions: &mut Transitions) {
        let previous = transitions.state;
        *transitions = Transitions::closed();

        if previous != CircuitState::Closed {
            info!(
                component = %self.name,
                total_calls = self.metrics.total_calls.load(Ordering::Relaxed),
                "Circuit breaker closed (recovered)"
            );
        }
    }

    fn transition_to_open(&self, transitions: &mut Transitions) {
        transitions.state = CircuitState::Open;
        transitions.opened_at = Some(Instant::now());
        transitions.half_open_permits = 0;
        transitions.half_open_successes = 0;
        self.metrics.times_opened.fetch_add(1, Ordering::Relaxed);

        warn!(
            component = %self.name,
            failure_count = transitions.failure_count,
            failure_threshold = self.config.failure_threshold,
            recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
            "Circuit breaker opened (failing fast)"
        );
    }
}
