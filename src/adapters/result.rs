//! Call outcomes and the adapter error taxonomy.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Why an adapter call did not produce a usable answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Deadline exceeded
    #[error("{adapter}: call timed out after {timeout:?}")]
    Timeout { adapter: String, timeout: Duration },

    /// Breaker refused the call
    #[error("{adapter}: circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        adapter: String,
        retry_after: Duration,
    },

    /// Token bucket starved
    #[error("{adapter}: rate limit exceeded")]
    RateLimitExceeded { adapter: String },

    /// Response failed the adapter's sanity check
    #[error("{adapter}: response failed validation: {reason}")]
    Validation { adapter: String, reason: String },

    /// Client/library missing or dependency unreachable at deployment level
    #[error("{adapter}: backend unavailable: {reason}")]
    BackendUnavailable { adapter: String, reason: String },

    /// The dependency returned an error
    #[error("{adapter}: call failed: {message}")]
    Execution { adapter: String, message: String },
}

impl AdapterError {
    /// Whether the retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimitExceeded { .. }
                | Self::Validation { .. }
                | Self::Execution { .. }
        )
    }

    /// Stable short name, used in logs and health output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Validation { .. } => "validation",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::Execution { .. } => "execution",
        }
    }
}

/// Error a concrete service returns from `execute`.
///
/// The adapter attaches its name and maps it into [`AdapterError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Backend is missing (binary not installed, client not configured)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Transient failure; retryable
    #[error("{0}")]
    Failed(String),

    /// Backend answered but the answer could not be interpreted; retryable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub(crate) fn into_adapter_error(self, adapter: &str) -> AdapterError {
        match self {
            Self::Unavailable(reason) => AdapterError::BackendUnavailable {
                adapter: adapter.to_string(),
                reason,
            },
            Self::Failed(message) => AdapterError::Execution {
                adapter: adapter.to_string(),
                message,
            },
            Self::InvalidResponse(reason) => AdapterError::Validation {
                adapter: adapter.to_string(),
                reason,
            },
        }
    }
}

/// Outcome of one `call()`.
///
/// `outcome` holds exactly one of payload or error.
#[derive(Debug, Clone)]
pub struct AdapterResult<R> {
    pub outcome: Result<R, AdapterError>,
    /// Wall-clock time spent in `call()`
    pub latency: Duration,
    /// Served from the adapter cache
    pub from_cache: bool,
    /// Served from the service fallback
    pub from_fallback: bool,
    /// Attempts beyond the first
    pub retry_count: u32,
}

impl<R> AdapterResult<R> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AdapterError> {
        self.outcome.as_ref().err()
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1_000.0
    }

    /// Consume the result, keeping only payload or error
    pub fn into_result(self) -> Result<R, AdapterError> {
        self.outcome
    }
}

/// Serializable view matching the external `{success, data|error, ...}` contract
#[derive(Debug, Clone, Serialize)]
pub struct AdapterResultView<'a, R: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub latency_ms: f64,
    pub from_cache: bool,
    pub from_fallback: bool,
    pub retry_count: u32,
}

impl<R: Serialize> AdapterResult<R> {
    pub fn view(&self) -> AdapterResultView<'_, R> {
        AdapterResultView {
            success: self.success(),
            data: self.data(),
            error: self.error().map(ToString::to_string),
            error_kind: self.error().map(AdapterError::kind),
            latency_ms: self.latency_ms(),
            from_cache: self.from_cache,
            from_fallback: self.from_fallback,
            retry_count: self.retry_count,
        }
    }
}
