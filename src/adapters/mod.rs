//! # Resilient Adapters
//!
//! Every call to an external verification or policy service goes through a
//! [`ResilientAdapter`], which composes caching, rate limiting, circuit
//! breaking, timeout/retry and fallback into one call contract.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use governance_resilience::adapters::{
//!     AdapterConfig, AdapterRegistry, PolicyDecisionService, HttpPolicyEngine, PolicyRequest,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AdapterRegistry::new();
//! let config = AdapterConfig::for_policy_engine();
//! let engine = Arc::new(HttpPolicyEngine::new("http://localhost:8181", &config)?);
//!
//! let adapter = registry
//!     .get_or_create("policy_engine", || PolicyDecisionService::new(engine), config)
//!     .await?;
//!
//! let result = adapter
//!     .call(&PolicyRequest::new("governance/allow", json!({"action": "amend"})))
//!     .await;
//! // Fail-closed: an unreachable engine yields `allow == false`, never an error
//! let allowed = result.data().map(|decision| decision.allow).unwrap_or(false);
//! # let _ = allowed;
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod config;
pub mod policy;
pub mod registry;
pub mod result;
pub mod satisfiability;

pub use base::{AdapterService, ManagedAdapter, ResilientAdapter};
pub use config::AdapterConfig;
pub use policy::{
    HttpPolicyEngine, PolicyDecision, PolicyDecisionAdapter, PolicyDecisionService, PolicyEngine,
    PolicyEvaluation, PolicyRequest,
};
pub use registry::AdapterRegistry;
pub use result::{AdapterError, AdapterResult, AdapterResultView, ServiceError};
pub use satisfiability::{
    ProcessSolver, SatRequest, SatResponse, SatStatus, SatisfiabilityAdapter,
    SatisfiabilityService, SmtSolver,
};
