//! Adapter registry: identity, concurrency, aggregation

mod common;

use common::{ScriptedService, Step, StubPolicyEngine};
use governance_resilience::adapters::{
    AdapterConfig, AdapterRegistry, PolicyDecisionService, PolicyRequest,
};
use governance_resilience::RegistryError;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_first_config_wins() {
    let registry = AdapterRegistry::new();
    let first_config = AdapterConfig {
        timeout_ms: 1_111,
        ..AdapterConfig::default()
    };
    let second_config = AdapterConfig {
        timeout_ms: 2_222,
        ..AdapterConfig::default()
    };

    let first = registry
        .get_or_create("x", ScriptedService::default, first_config)
        .await
        .unwrap();
    let second = registry
        .get_or_create("x", ScriptedService::default, second_config)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().timeout_ms, 1_111);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_get_or_create_constructs_once() {
    let registry = Arc::new(AdapterRegistry::new());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .get_or_create("shared", ScriptedService::default, AdapterConfig::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let adapters: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    for adapter in &adapters[1..] {
        assert!(Arc::ptr_eq(&adapters[0], adapter));
    }
    assert_eq!(registry.list().await, vec!["shared".to_string()]);
}

#[tokio::test]
async fn test_typed_and_managed_lookup() {
    let registry = AdapterRegistry::new();
    let engine = StubPolicyEngine::allowing();
    let created = registry
        .get_or_create(
            "policy_engine",
            || PolicyDecisionService::new(engine.clone()),
            AdapterConfig::for_policy_engine(),
        )
        .await
        .unwrap();

    let typed = registry
        .get::<PolicyDecisionService>("policy_engine")
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&created, &typed));

    let decision = typed
        .call(&PolicyRequest::new("governance/allow", json!({"actor": "steward"})))
        .await;
    assert!(decision.data().unwrap().allow);

    let managed = registry.get_managed("policy_engine").await.unwrap();
    assert_eq!(managed.name(), "policy_engine");
    assert_eq!(managed.metrics().total_calls, 1);

    assert!(matches!(
        registry.get::<ScriptedService>("policy_engine").await,
        Err(RegistryError::TypeMismatch { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_health_score_and_reset_all() {
    let registry = AdapterRegistry::new();
    let config = AdapterConfig {
        max_retries: 0,
        fallback_enabled: false,
        circuit_failure_threshold: 1,
        ..AdapterConfig::default()
    };

    let failing = registry
        .get_or_create("failing", || ScriptedService::new([Step::Fail]), config.clone())
        .await
        .unwrap();
    registry
        .get_or_create("steady", ScriptedService::default, config)
        .await
        .unwrap();

    assert!(!failing.call(&"q".to_string()).await.success());

    let health = registry.get_all_health().await;
    assert_eq!(health.total_count, 2);
    assert_eq!(health.healthy_count, 1);
    assert!(!health.healthy);
    assert!(!health.adapters["failing"].healthy);

    let metrics = registry.get_all_metrics().await;
    assert_eq!(metrics.totals.failed_calls, 1);

    registry.reset_all().await;
    assert_eq!(registry.get_all_health().await.healthy_count, 2);
}

#[tokio::test]
async fn test_close_all_is_terminal() {
    let registry = AdapterRegistry::new();
    registry
        .get_or_create("a", ScriptedService::default, AdapterConfig::default())
        .await
        .unwrap();

    registry.close_all().await;

    assert!(registry.is_empty().await);
    assert!(matches!(
        registry
            .get_or_create("a", ScriptedService::default, AdapterConfig::default())
            .await,
        Err(RegistryError::Closed)
    ));
}
