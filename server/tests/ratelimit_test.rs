//! Integration tests for Redis-backed admission counters.
//!
//! These tests require a running Redis instance at `redis://localhost:6379`
//! (override with `REDIS_URL`).
//! Run with: `cargo test --test ratelimit_test -- --ignored --nocapture`

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use fred::prelude::*;
use helpers::{test_rate_limit_config, test_selector, unique_prefix};
use gk_server::ratelimit::{
    key_by_ip, AdmissionGate, CounterBackend, Decision, RedisCounter, RequestContext,
};
use gk_server::store::{StoreClient, TopologyConfig, TopologySelector};

const WINDOW: Duration = Duration::from_secs(60);

/// Helper to get a connected store client.
async fn connected_store() -> StoreClient {
    let store = test_selector()
        .client()
        .await
        .expect("REDIS_URL should produce a client");
    store
        .client()
        .wait_for_connect()
        .await
        .expect("Failed to connect to Redis");
    store
}

/// The 3-per-minute scenario against the shared store.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_three_per_minute_scenario() {
    let selector = test_selector();
    let gate = AdmissionGate::new(&selector, test_rate_limit_config(3, 60)).await;
    assert_eq!(gate.backend_name(), "redis");

    let k1 = RequestContext::from_ip("198.51.100.1");
    let k2 = RequestContext::from_ip("198.51.100.2");

    for i in 0..3 {
        assert_eq!(
            gate.check(&k1).await,
            Decision::allow(),
            "Request {} should be allowed within limit",
            i + 1
        );
    }

    let denied = gate.check(&k1).await;
    assert!(!denied.allowed, "Fourth request should be blocked");
    assert!(
        (1..=60).contains(&denied.retry_after_secs),
        "retry_after should be within the window, got {}",
        denied.retry_after_secs
    );

    assert!(gate.check(&k2).await.allowed, "Other key is independent");
}

/// The script is loaded on first use against a real Redis.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_script_strategy_selected() {
    let counter = RedisCounter::new(connected_store().await, unique_prefix());
    assert_eq!(counter.strategy_name(), None);

    let state = counter.increment("k1", WINDOW).await.expect("increment failed");
    assert_eq!(state.count, 1);
    assert!(state.ttl > Duration::ZERO && state.ttl <= WINDOW);
    assert_eq!(counter.strategy_name(), Some("script"));
}

/// Later increments never push the expiry back.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_ttl_not_extended() {
    let store = connected_store().await;
    let prefix = unique_prefix();
    let counter = RedisCounter::new(store.clone(), prefix.clone());

    let first = counter.increment("k1", WINDOW).await.expect("increment failed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = counter.increment("k1", WINDOW).await.expect("increment failed");

    assert_eq!(second.count, 2);
    assert!(second.ttl < first.ttl, "TTL must only count down");

    let pttl: i64 = store
        .client()
        .pttl(format!("{prefix}:k1"))
        .await
        .expect("PTTL failed");
    assert!(pttl > 0 && pttl <= 60_000);
}

/// A window expires and the key starts over at one.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_window_reset() {
    let counter = RedisCounter::new(connected_store().await, unique_prefix());
    let short = Duration::from_millis(200);

    for _ in 0..3 {
        counter.increment("k1", short).await.expect("increment failed");
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let state = counter.increment("k1", short).await.expect("increment failed");
    assert_eq!(state.count, 1);
}

/// A counter left without expiry gets one on the next increment.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_missing_expiry_is_repaired() {
    let store = connected_store().await;
    let prefix = unique_prefix();
    let key = format!("{prefix}:k1");

    let _: () = store
        .client()
        .set(key.as_str(), 5_i64, None, None, false)
        .await
        .expect("SET failed");

    let counter = RedisCounter::new(store.clone(), prefix);
    let state = counter.increment("k1", WINDOW).await.expect("increment failed");
    assert_eq!(state.count, 6);
    assert_eq!(state.ttl, WINDOW);

    let pttl: i64 = store.client().pttl(key.as_str()).await.expect("PTTL failed");
    assert!(pttl > 0, "expiry should have been set, got {pttl}");
}

/// A flushed script cache is reloaded transparently.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_noscript_reload() {
    let store = connected_store().await;
    let counter = RedisCounter::new(store.clone(), unique_prefix());

    assert_eq!(counter.increment("k1", WINDOW).await.expect("increment failed").count, 1);

    let _: () = store
        .client()
        .script_flush(false)
        .await
        .expect("SCRIPT FLUSH failed");

    let state = counter.increment("k1", WINDOW).await.expect("increment after flush failed");
    assert_eq!(state.count, 2);
    assert_eq!(counter.strategy_name(), Some("script"));
}

/// Counters on separate clients (separate replicas) share one bucket.
#[tokio::test]
#[ignore] // Requires Redis
async fn test_replicas_share_bucket() {
    let prefix = unique_prefix();
    let replica_a = RedisCounter::new(connected_store().await, prefix.clone());
    let replica_b = RedisCounter::new(connected_store().await, prefix);

    assert_eq!(replica_a.increment("k1", WINDOW).await.unwrap().count, 1);
    assert_eq!(replica_b.increment("k1", WINDOW).await.unwrap().count, 2);
    assert_eq!(replica_a.increment("k1", WINDOW).await.unwrap().count, 3);
}

/// 100 concurrent checks against max=25 admit exactly 25.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires Redis
async fn test_concurrent_checks_admit_exactly_max() {
    let counter = RedisCounter::new(connected_store().await, unique_prefix());
    let mut config = test_rate_limit_config(25, 60);
    config.store_timeout = Duration::from_secs(5);
    let gate = AdmissionGate::with_backend(
        Some(Arc::new(counter) as Arc<dyn CounterBackend>),
        config,
        key_by_ip(),
    );

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let gate = gate.clone();
            tokio::spawn(async move { gate.check_key("hot").await })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().allowed {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 25, "Exactly max requests should be admitted");
}

/// On a cluster the script is registered on every primary, so keys hashing
/// to different shards all go through it.
/// Set `REDIS_CLUSTER_NODES` (default `127.0.0.1:7000`).
#[tokio::test]
#[ignore] // Requires Redis cluster
async fn test_cluster_script_on_every_primary() {
    let nodes =
        std::env::var("REDIS_CLUSTER_NODES").unwrap_or_else(|_| "127.0.0.1:7000".to_string());
    let config = TopologyConfig::from_lookup(|name| {
        (name == "REDIS_CLUSTER_NODES").then(|| nodes.clone())
    })
    .expect("valid cluster node list");
    let store = TopologySelector::new(config)
        .client()
        .await
        .expect("cluster client should be created");
    assert!(store.is_clustered());
    store
        .client()
        .wait_for_connect()
        .await
        .expect("Failed to connect to Redis cluster");

    let counter = RedisCounter::new(store, unique_prefix());
    for i in 0..32 {
        let state = counter
            .increment(&format!("k{i}"), WINDOW)
            .await
            .expect("increment failed");
        assert_eq!(state.count, 1);
    }
    assert_eq!(counter.strategy_name(), Some("script"));
}
