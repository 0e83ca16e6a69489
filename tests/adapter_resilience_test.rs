//! End-to-end behavior of resilient adapters over scripted dependencies

mod common;

use common::{ScriptedService, Step, StubPolicyEngine, StubSolver};
use governance_resilience::adapters::{
    AdapterConfig, AdapterError, PolicyDecisionService, PolicyRequest, ResilientAdapter,
    SatRequest, SatStatus, SatisfiabilityService,
};
use governance_resilience::resilience::CircuitState;
use serde_json::json;
use std::time::Duration;

fn fast_config() -> AdapterConfig {
    AdapterConfig {
        timeout_ms: 200,
        max_retries: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 200,
        ..AdapterConfig::default()
    }
}

#[tokio::test]
async fn test_identical_policy_calls_hit_cache() {
    let engine = StubPolicyEngine::allowing();
    let adapter = ResilientAdapter::new(
        "policy_engine",
        PolicyDecisionService::new(engine.clone()),
        AdapterConfig::for_policy_engine(),
    )
    .unwrap();
    let request = PolicyRequest::new("governance/amend", json!({"actor": "council", "votes": 7}));

    let first = adapter.call(&request).await;
    let second = adapter.call(&request).await;

    assert!(first.success() && second.success());
    assert_eq!(first.data(), second.data());
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(engine.calls(), 1);
    assert_eq!(adapter.get_metrics().cache_hits, 1);
}

#[tokio::test]
async fn test_fail_closed_with_open_circuit_never_allows() {
    let engine = StubPolicyEngine::allowing();
    let adapter = ResilientAdapter::new(
        "policy_engine",
        PolicyDecisionService::new(engine.clone()),
        AdapterConfig::for_policy_engine(),
    )
    .unwrap();
    adapter.circuit_breaker().force_open();

    let result = adapter
        .call(&PolicyRequest::new("governance/amend", json!({"actor": "anyone"})))
        .await;

    assert!(result.success());
    assert!(result.from_fallback);
    assert!(!result.data().unwrap().allow);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fail_open_allows_when_engine_keeps_failing() {
    let engine = StubPolicyEngine::allowing();
    engine.set_failing(true);
    let adapter = ResilientAdapter::new(
        "policy_engine",
        PolicyDecisionService::new(engine.clone()).fail_open(),
        AdapterConfig {
            max_retries: 1,
            ..fast_config()
        },
    )
    .unwrap();

    let result = adapter
        .call(&PolicyRequest::new("governance/read", json!({})))
        .await;

    assert!(result.from_fallback);
    assert!(result.data().unwrap().allow);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_k_failures_then_success_reports_k_retries() {
    let service = ScriptedService::new([Step::Fail, Step::Fail, Step::Fail]);
    let adapter = ResilientAdapter::new("scripted", service, fast_config()).unwrap();

    let result = adapter.call(&"formula".to_string()).await;

    assert!(result.success());
    assert!(!result.from_fallback);
    assert_eq!(result.retry_count, 3);
    assert_eq!(result.data().map(String::as_str), Some("echo:formula"));
    assert_eq!(adapter.service().executions(), 4);
    assert_eq!(adapter.get_metrics().retries, 3);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back() {
    let service = ScriptedService::new([Step::Hang]).with_fallback("safe");
    let adapter = ResilientAdapter::new(
        "scripted",
        service,
        AdapterConfig {
            max_retries: 0,
            ..fast_config()
        },
    )
    .unwrap();

    let result = adapter.call(&"slow".to_string()).await;

    assert!(result.from_fallback);
    assert_eq!(result.data().map(String::as_str), Some("safe"));
    let metrics = adapter.get_metrics();
    assert_eq!(metrics.timeouts, 1);
    assert_eq!(metrics.fallback_uses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_then_recovers_through_half_open() {
    let service = ScriptedService::new([Step::Fail, Step::Fail]);
    let adapter = ResilientAdapter::new(
        "scripted",
        service,
        AdapterConfig {
            max_retries: 0,
            fallback_enabled: false,
            circuit_failure_threshold: 2,
            circuit_recovery_timeout_seconds: 1.0,
            half_open_max_calls: 1,
            ..fast_config()
        },
    )
    .unwrap();

    assert!(!adapter.call(&"a".to_string()).await.success());
    assert!(!adapter.call(&"b".to_string()).await.success());
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::Open);
    assert!(!adapter.get_health().healthy);

    let rejected = adapter.call(&"c".to_string()).await;
    assert!(matches!(rejected.error(), Some(AdapterError::CircuitOpen { .. })));
    assert_eq!(adapter.service().executions(), 2);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::HalfOpen);

    let probe = adapter.call(&"d".to_string()).await;
    assert!(probe.success());
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::Closed);
    assert!(adapter.get_health().healthy);
}

#[tokio::test(start_paused = true)]
async fn test_backend_unavailable_uses_fallback_until_reset() {
    let service = ScriptedService::new([Step::Unavailable]).with_fallback("degraded");
    let adapter = ResilientAdapter::new("scripted", service, fast_config()).unwrap();

    let first = adapter.call(&"x".to_string()).await;
    assert!(first.from_fallback);
    assert!(!adapter.backend_available());
    // Missing backends are not a breaker failure
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::Closed);

    let second = adapter.call(&"y".to_string()).await;
    assert!(second.from_fallback);
    assert_eq!(adapter.service().executions(), 1);

    adapter.reset().await;
    let third = adapter.call(&"z".to_string()).await;
    assert!(!third.from_fallback);
    assert_eq!(third.data().map(String::as_str), Some("echo:z"));
}

#[tokio::test(start_paused = true)]
async fn test_backend_unavailable_during_half_open_keeps_probe_budget() {
    let service = ScriptedService::new([Step::Unavailable]).with_fallback("degraded");
    let adapter = ResilientAdapter::new(
        "scripted",
        service,
        AdapterConfig {
            circuit_recovery_timeout_seconds: 1.0,
            half_open_max_calls: 1,
            ..fast_config()
        },
    )
    .unwrap();

    adapter.circuit_breaker().force_open();
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::HalfOpen);

    let degraded = adapter.call(&"x".to_string()).await;
    assert!(degraded.from_fallback);
    assert_eq!(adapter.service().executions(), 1);

    // The single probe permit was handed back
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::HalfOpen);
    assert!(adapter.circuit_breaker().try_acquire().is_ok());
}

#[tokio::test]
async fn test_satisfiability_results_cached_by_formula() {
    let solver = StubSolver::new("sat\n(model\n  (define-fun x () Int 1)\n)");
    let adapter = ResilientAdapter::new(
        "z3",
        SatisfiabilityService::new(solver.clone()),
        AdapterConfig::for_satisfiability(),
    )
    .unwrap();

    let request = SatRequest::new("(declare-const x Int)\n(assert (> x 0))").with_model();
    let first = adapter.call(&request).await;
    let second = adapter.call(&request).await;

    assert_eq!(first.data().unwrap().status, SatStatus::Sat);
    assert!(first.data().unwrap().model.is_some());
    assert_eq!(first.data(), second.data());
    assert!(second.from_cache);
    assert_eq!(solver.runs(), 1);

    // Without a model request the answer is cached separately
    adapter
        .call(&SatRequest::new("(declare-const x Int)\n(assert (> x 0))"))
        .await;
    assert_eq!(solver.runs(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_solver_errors_fall_back_to_unknown() {
    let solver = StubSolver::new("(error \"line 1 column 5: unknown constant y\")");
    let adapter = ResilientAdapter::new(
        "z3",
        SatisfiabilityService::new(solver.clone()),
        AdapterConfig {
            max_retries: 1,
            ..AdapterConfig::for_satisfiability()
        },
    )
    .unwrap();

    let result = adapter.call(&SatRequest::new("(assert y)")).await;

    assert!(result.success());
    assert!(result.from_fallback);
    assert_eq!(result.data().unwrap().status, SatStatus::Unknown);
    assert_eq!(solver.runs(), 2);
}

#[tokio::test]
async fn test_result_view_serializes_flags() {
    let adapter =
        ResilientAdapter::new("scripted", ScriptedService::default(), fast_config()).unwrap();
    let result = adapter.call(&"q".to_string()).await;

    let view = serde_json::to_value(result.view()).unwrap();
    assert_eq!(view["success"], json!(true));
    assert_eq!(view["data"], json!("echo:q"));
    assert_eq!(view["from_cache"], json!(false));
    assert_eq!(view["retry_count"], json!(0));
}
