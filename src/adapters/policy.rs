//! # Policy-Decision Adapter
//!
//! Wraps a policy-decision engine. This adapter is security relevant: when
//! the engine cannot be reached the fallback is **deny**. Failing open has to
//! be configured explicitly and is logged on every use.

use crate::adapters::base::{AdapterService, ResilientAdapter};
use crate::adapters::result::ServiceError;
use crate::adapters::AdapterConfig;
use crate::config::ConfigurationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Adapter over [`PolicyDecisionService`]
pub type PolicyDecisionAdapter = ResilientAdapter<PolicyDecisionService>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Policy document path, e.g. `governance/allow` or `governance.allow`
    pub policy_path: String,
    pub input: Value,
}

impl PolicyRequest {
    pub fn new(policy_path: impl Into<String>, input: Value) -> Self {
        Self {
            policy_path: policy_path.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Engine-assigned id, when the engine reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    /// False when the policy document did not exist or produced no result
    pub defined: bool,
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reasons: vec![reason.into()],
            decision_id: None,
            defined: true,
        }
    }

    fn undefined() -> Self {
        Self {
            allow: false,
            reasons: Vec::new(),
            decision_id: None,
            defined: false,
        }
    }

    /// Interpret an engine `result`: either a bare boolean or an object with
    /// a boolean `allow` and optional `reasons`.
    pub fn from_result(result: Option<&Value>) -> Result<Self, ServiceError> {
        let Some(result) = result else {
            return Ok(Self::undefined());
        };

        match result {
            Value::Bool(allow) => Ok(Self {
                allow: *allow,
                reasons: Vec::new(),
                decision_id: None,
                defined: true,
            }),
            Value::Object(fields) => {
                let allow = fields.get("allow").and_then(Value::as_bool).ok_or_else(|| {
                    ServiceError::InvalidResponse("policy result has no boolean 'allow'".to_string())
                })?;
                let reasons = match fields.get("reasons") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(reason) => reason.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    Some(Value::String(reason)) => vec![reason.clone()],
                    _ => Vec::new(),
                };
                Ok(Self {
                    allow,
                    reasons,
                    decision_id: None,
                    defined: true,
                })
            }
            other => Err(ServiceError::InvalidResponse(format!(
                "unexpected policy result type: {other}"
            ))),
        }
    }
}

/// Raw answer from a policy engine
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyEvaluation {
    /// The `result` document; `None` when the policy is undefined
    pub result: Option<Value>,
    pub decision_id: Option<String>,
}

/// Seam between the adapter and a concrete policy engine
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(&self, policy_path: &str, input: &Value) -> Result<PolicyEvaluation, ServiceError>;

    async fn close(&self) {}
}

/// Policy engine reached over the OPA data API
#[derive(Debug, Clone)]
pub struct HttpPolicyEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPolicyEngine {
    /// Build a client bounded by the adapter's connect and call timeouts
    pub fn new(base_url: impl Into<String>, config: &AdapterConfig) -> Result<Self, ConfigurationError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigurationError::invalid_value(
                "policy_engine.base_url",
                &base_url,
                "must be an http:// or https:// URL",
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigurationError::validation("policy_engine", e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/v1/data/{path}`, accepting dotted or slashed paths
    pub fn data_url(&self, policy_path: &str) -> String {
        let path = policy_path.trim_matches('/').replace('.', "/");
        format!("{}/v1/data/{}", self.base_url, path)
    }
}

#[async_trait]
impl PolicyEngine for HttpPolicyEngine {
    async fn evaluate(&self, policy_path: &str, input: &Value) -> Result<PolicyEvaluation, ServiceError> {
        let response = self
            .client
            .post(self.data_url(policy_path))
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(|e| ServiceError::Failed(format!("policy engine request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Failed(format!(
                "policy engine returned HTTP {status}"
            )));
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("malformed policy response: {e}")))?;

        Ok(PolicyEvaluation {
            result: body.get_mut("result").map(Value::take),
            decision_id: body
                .get("decision_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Policy decisions through a [`PolicyEngine`]
#[derive(Clone)]
pub struct PolicyDecisionService {
    engine: Arc<dyn PolicyEngine>,
    fail_closed: bool,
}

impl fmt::Debug for PolicyDecisionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyDecisionService")
            .field("fail_closed", &self.fail_closed)
            .finish_non_exhaustive()
    }
}

impl PolicyDecisionService {
    /// Fail-closed service
    pub fn new(engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            engine,
            fail_closed: true,
        }
    }

    /// Opt into allowing access when the engine is unreachable
    pub fn fail_open(mut self) -> Self {
        self.fail_closed = false;
        self
    }

    pub fn is_fail_closed(&self) -> bool {
        self.fail_closed
    }
}

#[async_trait]
impl AdapterService for PolicyDecisionService {
    type Request = PolicyRequest;
    type Response = PolicyDecision;

    async fn execute(&self, request: &PolicyRequest) -> Result<PolicyDecision, ServiceError> {
        let evaluation = self
            .engine
            .evaluate(&request.policy_path, &request.input)
            .await?;
        let mut decision = PolicyDecision::from_result(evaluation.result.as_ref())?;
        decision.decision_id = evaluation.decision_id;
        Ok(decision)
    }

    fn validate(&self, response: &PolicyDecision) -> Result<(), String> {
        if response.defined {
            Ok(())
        } else {
            Err("policy produced no result".to_string())
        }
    }

    fn cache_key(&self, request: &PolicyRequest) -> Option<String> {
        // serde_json maps are ordered, so this serialization is canonical
        let canonical = serde_json::to_string(&request.input).ok()?;
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        Some(format!("policy:{}:{digest}", request.policy_path))
    }

    fn fallback(&self, request: &PolicyRequest) -> Option<PolicyDecision> {
        if self.fail_closed {
            return Some(PolicyDecision::deny(
                "policy engine unavailable; failing closed",
            ));
        }

        warn!(
            policy_path = %request.policy_path,
            "Policy engine unavailable - FAIL-OPEN fallback granting access"
        );
        Some(PolicyDecision {
            allow: true,
            reasons: vec!["policy engine unavailable; failing open".to_string()],
            decision_id: None,
            defined: true,
        })
    }

    async fn close(&self) {
        self.engine.close().await;
    }
}
