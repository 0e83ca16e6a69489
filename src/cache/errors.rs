//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable or connection dropped
    #[error("Cache connection failed: {0}")]
    ConnectionError(String),

    /// Typed helper could not encode or decode a value
    #[error("Cache value could not be (de)serialized: {0}")]
    SerializationError(String),

    /// Cache operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Backend answered with an error
    #[error("Cache backend rejected the operation: {0}")]
    BackendError(String),

    /// No shared backend is configured or reachable
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
