//! # Resilient Adapter
//!
//! Orchestrates one external dependency. A call goes through these steps:
//!
//! ```text
//! cache hit? ──yes──> return (from_cache)
//!     │no
//! backend known missing? ──yes──> fallback handling
//!     │no
//! ┌─> circuit permits? ──no──> fallback handling
//! │       │yes
//! │   rate-limit token? ──no──> failure (counts toward circuit)
//! │       │yes
//! │   execute under timeout ─> validate ─> success: record, cache, return
//! │       │failure
//! └── retries left? backoff : fallback handling
//! ```
//!
//! Fallback handling returns the service's fallback (`from_fallback`, still a
//! success) when enabled, otherwise the last typed error.
//!
//! Concrete services plug in through [`AdapterService`].

use crate::adapters::result::{AdapterError, AdapterResult, ServiceError};
use crate::adapters::AdapterConfig;
use crate::config::ConfigurationError;
use crate::resilience::{
    AdapterHealth, AdapterMetrics, CircuitBreaker, CircuitState, TokenBucket,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A dependency that can be wrapped by [`ResilientAdapter`].
///
/// `execute` and `validate` are required; `cache_key` and `fallback` default
/// to "not cacheable" and "no fallback".
#[async_trait]
pub trait AdapterService: Send + Sync + 'static {
    type Request: Send + Sync;
    type Response: Clone + Send + Sync + 'static;

    /// Perform one call against the dependency
    async fn execute(&self, request: &Self::Request) -> Result<Self::Response, ServiceError>;

    /// Sanity-check a response; `Err(reason)` is treated like a failed attempt
    fn validate(&self, response: &Self::Response) -> Result<(), String>;

    /// Deterministic cache key, or `None` when the request must not be cached
    fn cache_key(&self, _request: &Self::Request) -> Option<String> {
        None
    }

    /// Conservative answer used when the dependency cannot be reached
    fn fallback(&self, _request: &Self::Request) -> Option<Self::Response> {
        None
    }

    /// Release network resources
    async fn close(&self) {}
}

/// Object-safe view of an adapter, used by the registry for aggregation
#[async_trait]
pub trait ManagedAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn health(&self) -> AdapterHealth;
    fn metrics(&self) -> AdapterMetrics;
    /// Reset the breaker and limiter and clear the cache
    async fn reset(&self);
    /// Release network resources
    async fn close(&self);
}

#[derive(Debug, Default)]
struct AdapterCounters {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    cache_hits: AtomicU64,
    fallback_uses: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    rate_limited: AtomicU64,
    circuit_rejections: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl AdapterCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> AdapterMetrics {
        let successful_calls = self.successful_calls.load(Ordering::Relaxed);
        let failed_calls = self.failed_calls.load(Ordering::Relaxed);
        let completed = successful_calls + failed_calls;
        let average_latency_ms = if completed > 0 {
            self.total_latency_micros.load(Ordering::Relaxed) as f64 / completed as f64 / 1_000.0
        } else {
            0.0
        };

        AdapterMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls,
            failed_calls,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}

/// Counts a call as failed if its future is dropped before completing
struct CallInProgress<'a> {
    counters: &'a AdapterCounters,
    armed: bool,
}

impl CallInProgress<'_> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for CallInProgress<'_> {
    fn drop(&mut self) {
        if self.armed {
            AdapterCounters::bump(&self.counters.failed_calls);
        }
    }
}

/// Records a circuit failure if an in-flight attempt is cancelled
struct InFlightAttempt<'a> {
    adapter: &'a str,
    circuit_breaker: &'a CircuitBreaker,
    started: Instant,
    armed: bool,
}

impl InFlightAttempt<'_> {
    fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightAttempt<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(adapter = %self.adapter, "In-flight call cancelled by caller");
            self.circuit_breaker
                .record_failure_after(self.started.elapsed());
        }
    }
}

/// Resilient wrapper around one [`AdapterService`]
pub struct ResilientAdapter<S: AdapterService> {
    name: String,
    service: S,
    config: AdapterConfig,
    circuit_breaker: CircuitBreaker,
    rate_limiter: TokenBucket,
    cache: Option<moka::future::Cache<String, S::Response>>,
    counters: AdapterCounters,
    backend_available: AtomicBool,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl<S: AdapterService> fmt::Debug for ResilientAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientAdapter")
            .field("name", &self.name)
            .field("service", &std::any::type_name::<S>())
            .field("state", &self.circuit_breaker.state())
            .field("cache_entries", &self.cache_entry_count())
            .finish()
    }
}

impl<S: AdapterService> ResilientAdapter<S> {
    /// Wrap `service`; fails if `config` is invalid
    pub fn new(
        name: impl Into<String>,
        service: S,
        config: AdapterConfig,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        config.validate()?;

        let cache = config.cache_enabled.then(|| {
            moka::future::Cache::builder()
                .max_capacity(config.cache_max_entries)
                .time_to_live(config.cache_ttl())
                .build()
        });

        info!(
            adapter = %name,
            timeout_ms = config.timeout_ms,
            max_retries = config.max_retries,
            cache_enabled = config.cache_enabled,
            fallback_enabled = config.fallback_enabled,
            "Resilient adapter created"
        );

        Ok(Self {
            circuit_breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker_config()),
            rate_limiter: TokenBucket::new(name.clone(), config.rate_limiter_config()),
            name,
            service,
            config,
            cache,
            counters: AdapterCounters::default(),
            backend_available: AtomicBool::new(true),
            last_check: Mutex::new(None),
        })
    }

    /// Call the dependency with caching, rate limiting, circuit breaking,
    /// timeout, retry and fallback applied
    pub async fn call(&self, request: &S::Request) -> AdapterResult<S::Response> {
        let started = Instant::now();
        AdapterCounters::bump(&self.counters.total_calls);
        let in_progress = CallInProgress {
            counters: &self.counters,
            armed: true,
        };

        let result = self.call_inner(request, started).await;
        in_progress.complete();

        if result.success() {
            AdapterCounters::bump(&self.counters.successful_calls);
        } else {
            AdapterCounters::bump(&self.counters.failed_calls);
        }
        self.counters
            .total_latency_micros
            .fetch_add(result.latency.as_micros() as u64, Ordering::Relaxed);

        result
    }

    async fn call_inner(&self, request: &S::Request, started: Instant) -> AdapterResult<S::Response> {
        let cache_key = match &self.cache {
            Some(_) => self.service.cache_key(request),
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                AdapterCounters::bump(&self.counters.cache_hits);
                debug!(adapter = %self.name, key = %key, "Adapter cache HIT");
                return Self::finish(Ok(hit), started, true, false, 0);
            }
        }

        if !self.backend_available.load(Ordering::Acquire) {
            let error = AdapterError::BackendUnavailable {
                adapter: self.name.clone(),
                reason: "backend previously reported missing".to_string(),
            };
            return self.fallback_or_error(request, error, started, 0);
        }

        let mut retry_count: u32 = 0;
        let last_error = loop {
            if let Err(retry_after) = self.circuit_breaker.try_acquire() {
                AdapterCounters::bump(&self.counters.circuit_rejections);
                break AdapterError::CircuitOpen {
                    adapter: self.name.clone(),
                    retry_after,
                };
            }

            match self.attempt(request).await {
                Ok(response) => {
                    if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                        cache.insert(key, response.clone()).await;
                    }
                    return Self::finish(Ok(response), started, false, false, retry_count);
                }
                Err(error @ AdapterError::BackendUnavailable { .. }) => {
                    self.backend_available.store(false, Ordering::Release);
                    warn!(
                        adapter = %self.name,
                        error = %error,
                        "Backend unavailable - adapter degraded to fallback behavior"
                    );
                    break error;
                }
                Err(error) if error.is_retryable() && retry_count < self.config.max_retries => {
                    let delay = self.config.backoff_delay(retry_count);
                    debug!(
                        adapter = %self.name,
                        error = %error,
                        attempt = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    retry_count += 1;
                    AdapterCounters::bump(&self.counters.retries);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => break error,
            }
        };

        self.fallback_or_error(request, last_error, started, retry_count)
    }

    /// One attempt: token, timed execution, validation, breaker bookkeeping
    async fn attempt(&self, request: &S::Request) -> Result<S::Response, AdapterError> {
        if !self.rate_limiter.acquire() {
            AdapterCounters::bump(&self.counters.rate_limited);
            self.circuit_breaker.record_failure();
            return Err(AdapterError::RateLimitExceeded {
                adapter: self.name.clone(),
            });
        }

        let started = Instant::now();
        let in_flight = InFlightAttempt {
            adapter: &self.name,
            circuit_breaker: &self.circuit_breaker,
            started,
            armed: true,
        };
        let outcome = tokio::time::timeout(self.config.timeout(), self.service.execute(request)).await;
        in_flight.complete();

        let elapsed = started.elapsed();
        *self.last_check.lock() = Some(Utc::now());

        match outcome {
            Err(_) => {
                AdapterCounters::bump(&self.counters.timeouts);
                self.circuit_breaker.record_failure_after(elapsed);
                Err(AdapterError::Timeout {
                    adapter: self.name.clone(),
                    timeout: self.config.timeout(),
                })
            }
            Ok(Err(ServiceError::Unavailable(reason))) => {
                // Not a breaker outcome, but the permit must not stay spent
                self.circuit_breaker.release_permit();
                Err(AdapterError::BackendUnavailable {
                    adapter: self.name.clone(),
                    reason,
                })
            }
            Ok(Err(error)) => {
                self.circuit_breaker.record_failure_after(elapsed);
                Err(error.into_adapter_error(&self.name))
            }
            Ok(Ok(response)) => match self.service.validate(&response) {
                Ok(()) => {
                    self.circuit_breaker.record_success_after(elapsed);
                    Ok(response)
                }
                Err(reason) => {
                    self.circuit_breaker.record_failure_after(elapsed);
                    Err(AdapterError::Validation {
                        adapter: self.name.clone(),
                        reason,
                    })
                }
            },
        }
    }

    fn fallback_or_error(
        &self,
        request: &S::Request,
        error: AdapterError,
        started: Instant,
        retry_count: u32,
    ) -> AdapterResult<S::Response> {
        if self.config.fallback_enabled {
            if let Some(fallback) = self.service.fallback(request) {
                AdapterCounters::bump(&self.counters.fallback_uses);
                info!(
                    adapter = %self.name,
                    reason = error.kind(),
                    retry_count = retry_count,
                    "Serving fallback response"
                );
                return Self::finish(Ok(fallback), started, false, true, retry_count);
            }
        }

        warn!(
            adapter = %self.name,
            error = %error,
            retry_count = retry_count,
            "Adapter call failed"
        );
        Self::finish(Err(error), started, false, false, retry_count)
    }

    fn finish(
        outcome: Result<S::Response, AdapterError>,
        started: Instant,
        from_cache: bool,
        from_fallback: bool,
        retry_count: u32,
    ) -> AdapterResult<S::Response> {
        AdapterResult {
            outcome,
            latency: started.elapsed(),
            from_cache,
            from_fallback,
            retry_count,
        }
    }

    /// Health view: circuit state, last contact with the dependency
    pub fn get_health(&self) -> AdapterHealth {
        let state = self.circuit_breaker.state();
        let backend_available = self.backend_available.load(Ordering::Acquire);

        AdapterHealth {
            name: self.name.clone(),
            healthy: state != CircuitState::Open && backend_available,
            state,
            last_check: *self.last_check.lock(),
            time_until_recovery_ms: self.circuit_breaker.time_until_recovery().as_millis() as u64,
            backend_available,
        }
    }

    /// Cumulative call counters
    pub fn get_metrics(&self) -> AdapterMetrics {
        self.counters.snapshot()
    }

    /// Administrative recovery: close the circuit, refill the bucket, clear the
    /// cache and allow the backend to be tried again
    pub async fn reset(&self) {
        self.circuit_breaker.reset();
        self.rate_limiter.reset();
        self.backend_available.store(true, Ordering::Release);
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            cache.run_pending_tasks().await;
        }
        info!(adapter = %self.name, "Adapter reset");
    }

    /// Release the service's network resources and drop cached responses
    pub async fn close(&self) {
        self.service.close().await;
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
        info!(adapter = %self.name, "Adapter closed");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &TokenBucket {
        &self.rate_limiter
    }

    /// Whether the backend is still considered present
    pub fn backend_available(&self) -> bool {
        self.backend_available.load(Ordering::Acquire)
    }

    /// Approximate number of cached responses
    pub fn cache_entry_count(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.entry_count())
    }
}

#[async_trait]
impl<S: AdapterService> ManagedAdapter for ResilientAdapter<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> AdapterHealth {
        self.get_health()
    }

    fn metrics(&self) -> AdapterMetrics {
        self.get_metrics()
    }

    async fn reset(&self) {
        ResilientAdapter::reset(self).await;
    }

    async fn close(&self) {
        ResilientAdapter::close(self).await;
    }
}
