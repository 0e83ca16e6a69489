//! Shared test doubles for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use governance_resilience::adapters::{
    AdapterService, PolicyEngine, PolicyEvaluation, ServiceError, SmtSolver,
};
use governance_resilience::cache::{CacheError, CacheResult, CacheService, MemoryCacheService};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the next `execute` does
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(String),
    Fail,
    Hang,
    Unavailable,
}

/// Adapter service that plays back a script, then echoes the request
#[derive(Debug, Default)]
pub struct ScriptedService {
    steps: Mutex<VecDeque<Step>>,
    executions: AtomicUsize,
    fallback: Option<String>,
}

impl ScriptedService {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, value: &str) -> Self {
        self.fallback = Some(value.to_string());
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdapterService for ScriptedService {
    type Request = String;
    type Response = String;

    async fn execute(&self, request: &String) -> Result<String, ServiceError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            None => Ok(format!("echo:{request}")),
            Some(Step::Succeed(value)) => Ok(value),
            Some(Step::Fail) => Err(ServiceError::Failed("scripted failure".to_string())),
            Some(Step::Unavailable) => {
                Err(ServiceError::Unavailable("scripted outage".to_string()))
            }
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok("too late".to_string())
            }
        }
    }

    fn validate(&self, _response: &String) -> Result<(), String> {
        Ok(())
    }

    fn cache_key(&self, request: &String) -> Option<String> {
        Some(request.clone())
    }

    fn fallback(&self, _request: &String) -> Option<String> {
        self.fallback.clone()
    }
}

/// Policy engine returning a fixed evaluation, or failing when told to
#[derive(Debug)]
pub struct StubPolicyEngine {
    result: Value,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl StubPolicyEngine {
    pub fn allowing() -> Arc<Self> {
        Self::returning(Value::Bool(true))
    }

    pub fn returning(result: Value) -> Arc<Self> {
        Arc::new(Self {
            result,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyEngine for StubPolicyEngine {
    async fn evaluate(&self, _policy_path: &str, _input: &Value) -> Result<PolicyEvaluation, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Failed("connection refused".to_string()));
        }
        Ok(PolicyEvaluation {
            result: Some(self.result.clone()),
            decision_id: Some("decision-1".to_string()),
        })
    }
}

/// SMT solver returning canned output
#[derive(Debug)]
pub struct StubSolver {
    output: String,
    runs: AtomicUsize,
}

impl StubSolver {
    pub fn new(output: &str) -> Arc<Self> {
        Arc::new(Self {
            output: output.to_string(),
            runs: AtomicUsize::new(0),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmtSolver for StubSolver {
    async fn run(&self, _script: &str) -> Result<String, ServiceError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Shared-tier stand-in that counts traffic and can be switched off
#[derive(Debug, Clone)]
pub struct FlakyBackend {
    inner: Arc<FlakyInner>,
}

#[derive(Debug)]
struct FlakyInner {
    store: MemoryCacheService,
    failing: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FlakyInner {
                store: MemoryCacheService::new(1_000, Duration::from_secs(3_600)),
                failing: AtomicBool::new(false),
                gets: AtomicUsize::new(0),
                sets: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.inner.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.inner.sets.load(Ordering::SeqCst)
    }

    /// Read the raw store, bypassing counters and failure injection
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.store.get(key).await.ok().flatten()
    }

    fn check(&self) -> CacheResult<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            Err(CacheError::ConnectionError("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CacheService for FlakyBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.store.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.inner.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.store.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.store.delete(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.store.exists(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.check()?;
        self.inner.store.delete_pattern(pattern).await
    }

    async fn health_check(&self) -> CacheResult<bool> {
        self.check()?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "flaky"
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
