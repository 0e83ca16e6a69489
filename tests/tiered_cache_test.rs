//! Tiered cache behavior against a controllable shared tier

mod common;

use common::FlakyBackend;
use governance_resilience::cache::{
    CacheTier, RedisHealthState, SharedCacheHealthMonitor, TieredCacheManager,
};
use governance_resilience::config::{HealthCheckConfig, TieredCacheConfig};
use std::sync::Arc;
use std::time::Duration;

fn cache_config() -> TieredCacheConfig {
    TieredCacheConfig {
        promotion_threshold: 3,
        recovery_interval_seconds: 30,
        ..TieredCacheConfig::default()
    }
}

fn monitor() -> Arc<SharedCacheHealthMonitor> {
    Arc::new(SharedCacheHealthMonitor::new(
        "redis://cache.test:6379",
        HealthCheckConfig {
            unhealthy_threshold: 2,
            healthy_threshold: 2,
            ..HealthCheckConfig::default()
        },
    ))
}

fn manager_with_monitor() -> (
    TieredCacheManager<FlakyBackend>,
    FlakyBackend,
    Arc<SharedCacheHealthMonitor>,
) {
    let backend = FlakyBackend::new();
    let monitor = monitor();
    let cache = TieredCacheManager::new(cache_config(), Some(backend.clone()))
        .with_health_monitor(Arc::clone(&monitor));
    (cache, backend, monitor)
}

#[tokio::test(start_paused = true)]
async fn test_frequent_reads_promote_to_l1() {
    let (cache, backend, _monitor) = manager_with_monitor();
    cache.set("constitution:hash", "a1b2", None, None).await;
    assert_eq!(cache.current_tier("constitution:hash"), CacheTier::L2);

    for _ in 0..3 {
        assert_eq!(cache.get("constitution:hash").await.as_deref(), Some("a1b2"));
    }
    assert_eq!(cache.current_tier("constitution:hash"), CacheTier::L1);

    // Served from L1 from now on
    let shared_reads = backend.gets();
    assert_eq!(cache.get("constitution:hash").await.as_deref(), Some("a1b2"));
    assert_eq!(backend.gets(), shared_reads);

    let stats = cache.get_stats().await;
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.tiers.l1.hits, 1);
    assert_eq!(stats.tiers.l2.hits, 3);
}

#[tokio::test(start_paused = true)]
async fn test_reads_outside_window_do_not_promote() {
    let (cache, _backend, _monitor) = manager_with_monitor();
    cache.set("k", "v", None, None).await;

    for _ in 0..3 {
        cache.get("k").await;
        tokio::time::advance(Duration::from_secs(31)).await;
    }
    assert_eq!(cache.current_tier("k"), CacheTier::L2);
}

#[tokio::test(start_paused = true)]
async fn test_shared_tier_keys_carry_prefix() {
    let (cache, backend, _monitor) = manager_with_monitor();
    cache.set("amendment:42", "pending", None, None).await;

    assert_eq!(
        backend.peek("governance:cache:amendment:42").await.as_deref(),
        Some("pending")
    );
    assert_eq!(backend.peek("amendment:42").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_shared_tier_redirects_and_bypasses() {
    let (cache, backend, monitor) = manager_with_monitor();
    cache.set("before", "shared", None, None).await;

    monitor.force_state(RedisHealthState::Unhealthy);
    assert!(cache.is_degraded());

    let gets = backend.gets();
    let sets = backend.sets();

    assert_eq!(cache.set("during", "local", None, None).await, CacheTier::L3);
    assert_eq!(cache.get("during").await.as_deref(), Some("local"));
    // Only in L2, which is being skipped
    assert_eq!(cache.get("before").await, None);

    assert_eq!(backend.gets(), gets);
    assert_eq!(backend.sets(), sets);
    assert!(!cache.get_stats().await.tiers.l2.available);

    monitor.force_state(RedisHealthState::Healthy);
    assert!(!cache.is_degraded());
    assert_eq!(cache.get("before").await.as_deref(), Some("shared"));
    assert_eq!(cache.set("after", "shared", None, None).await, CacheTier::L2);
}

#[tokio::test(start_paused = true)]
async fn test_write_during_outage_is_not_hidden_after_recovery() {
    let (cache, backend, monitor) = manager_with_monitor();
    cache.set("k", "v1", None, None).await;

    monitor.force_state(RedisHealthState::Unhealthy);
    assert_eq!(cache.set("k", "v2", None, None).await, CacheTier::L3);

    monitor.force_state(RedisHealthState::Healthy);
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
    assert!(cache.exists("k").await);
    // The superseded shared copy was removed on first contact
    assert_eq!(backend.peek("governance:cache:k").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_shared_copy_removed_once_reachable() {
    let (cache, backend, monitor) = manager_with_monitor();
    cache.set("k", "v1", None, None).await;

    backend.set_failing(true);
    monitor.force_state(RedisHealthState::Unhealthy);
    assert_eq!(cache.set("k", "v2", None, None).await, CacheTier::L3);

    // Health restored but the endpoint still refuses the delete
    monitor.force_state(RedisHealthState::Healthy);
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
    assert_eq!(
        backend.peek("governance:cache:k").await.as_deref(),
        Some("v1")
    );

    backend.set_failing(false);
    cache.run_demotion_check().await;
    assert_eq!(backend.peek("governance:cache:k").await, None);
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
}

#[tokio::test(start_paused = true)]
async fn test_pinned_l3_write_replaces_shared_value() {
    let (cache, backend, _monitor) = manager_with_monitor();
    cache.set("k", "v1", None, None).await;
    assert_eq!(cache.set("k", "v2", None, Some(CacheTier::L3)).await, CacheTier::L3);

    assert_eq!(backend.peek("governance:cache:k").await, None);
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
}

#[tokio::test(start_paused = true)]
async fn test_data_path_errors_degrade_through_monitor() {
    let (cache, backend, monitor) = manager_with_monitor();
    backend.set_failing(true);

    // Each failing write still lands somewhere usable
    assert_eq!(cache.set("a", "1", None, None).await, CacheTier::L3);
    assert!(!cache.is_degraded());
    assert_eq!(cache.set("b", "2", None, None).await, CacheTier::L3);

    assert_eq!(monitor.state(), RedisHealthState::Unhealthy);
    assert!(cache.is_degraded());
    assert_eq!(cache.get("a").await.as_deref(), Some("1"));

    let stats = cache.get_stats().await;
    assert_eq!(stats.tiers.l2.errors, 2);
    assert!(stats.degraded);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_probe_after_interval() {
    let (cache, backend, monitor) = manager_with_monitor();
    backend.set_failing(true);
    monitor.force_state(RedisHealthState::Unhealthy);
    backend.set_failing(false);

    // Probe not due yet
    assert_eq!(cache.set("k", "v", None, None).await, CacheTier::L3);
    assert!(cache.is_degraded());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(cache.set("k", "v2", None, None).await, CacheTier::L2);
    assert!(!cache.is_degraded());
    // The successful probe was reported to the monitor
    assert_eq!(monitor.state(), RedisHealthState::Recovering);

    // The L2 write replaced the stale L3 copy
    assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_already_unhealthy_degrades_on_attach() {
    let backend = FlakyBackend::new();
    let monitor = monitor();
    monitor.force_state(RedisHealthState::Unhealthy);

    let cache = TieredCacheManager::new(cache_config(), Some(backend.clone()))
        .with_health_monitor(monitor);

    assert!(cache.is_degraded());
    assert_eq!(cache.set("k", "v", None, None).await, CacheTier::L3);
    assert_eq!(backend.sets(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_probes_drive_degradation() {
    let (cache, backend, monitor) = manager_with_monitor();
    let probes = cache.spawn_health_probes().unwrap();

    backend.set_failing(true);
    for _ in 0..3 {
        tokio::time::sleep(monitor.config().check_interval()).await;
    }
    assert!(cache.is_degraded());

    backend.set_failing(false);
    for _ in 0..3 {
        tokio::time::sleep(monitor.config().check_interval()).await;
    }
    assert_eq!(monitor.state(), RedisHealthState::Healthy);
    assert!(!cache.is_degraded());

    probes.abort();
}

#[tokio::test(start_paused = true)]
async fn test_l1_ttl_clamped_to_l2_ttl() {
    let cache: TieredCacheManager<FlakyBackend> = TieredCacheManager::new(
        TieredCacheConfig {
            l1_ttl_seconds: 7_200,
            l2_ttl_seconds: 600,
            ..TieredCacheConfig::default()
        },
        Some(FlakyBackend::new()),
    );

    assert!(cache.config().l1_ttl() <= cache.config().l2_ttl());
    assert_eq!(cache.config().l1_ttl_seconds, 600);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_task_demotes_idle_keys() {
    let (cache, _backend, _monitor) = manager_with_monitor();
    let cache = Arc::new(cache);
    cache.set("idle", "v", None, Some(CacheTier::L1)).await;
    assert_eq!(cache.current_tier("idle"), CacheTier::L1);

    let maintenance = Arc::clone(&cache).spawn_maintenance(Duration::from_secs(600));
    tokio::time::sleep(Duration::from_secs(3_600 + 601)).await;

    assert_eq!(cache.current_tier("idle"), CacheTier::L3);
    assert_eq!(cache.get("idle").await.as_deref(), Some("v"));
    assert_eq!(cache.get_stats().await.demotions, 1);

    maintenance.abort();
}
