//! Error types for the resilience substrate.
//!
//! Each layer owns its own `thiserror` enum; [`ResilienceError`] aggregates
//! them for callers that cross layers (bootstrap code, the registry).

use crate::adapters::AdapterError;
use crate::cache::CacheError;
use crate::config::ConfigurationError;
use thiserror::Error;

/// Errors raised by the adapter registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A name is registered with a different service type than requested
    #[error("Adapter '{name}' is registered with a different service type (expected {expected})")]
    TypeMismatch { name: String, expected: &'static str },

    /// The registry has been closed and refuses new adapters
    #[error("Adapter registry is closed")]
    Closed,

    /// Adapter configuration rejected at construction
    #[error("Invalid configuration for adapter '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, ResilienceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_messages() {
        let mismatch = RegistryError::TypeMismatch {
            name: "z3".to_string(),
            expected: "SatisfiabilityService",
        };
        assert!(mismatch.to_string().contains("'z3'"));
        assert_eq!(RegistryError::Closed.to_string(), "Adapter registry is closed");
    }

    #[test]
    fn test_conversion_into_resilience_error() {
        let err: ResilienceError = RegistryError::Closed.into();
        assert!(matches!(err, ResilienceError::Registry(RegistryError::Closed)));

        let err: ResilienceError = CacheError::Timeout("GET".to_string()).into();
        assert!(err.to_string().contains("timed out"));
    }
}
