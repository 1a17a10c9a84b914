//! Integration tests for graceful degradation
//!
//! The cache never fails its caller: with L2 unreachable, slow or absent,
//! every operation returns its miss / no-op result and L1 keeps serving.

mod common;

use arcade_cache::{CacheSystemBuilder, RemoteBackend, RemoteCache, RemoteTtl, SetOptions};
use common::*;
use std::time::Duration;

/// Every operation completes with its documented result while L2 is down
#[tokio::test]
async fn test_operations_with_remote_unavailable() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    cache.set("app:before", &1, None).await;
    backend.set_available(false);

    // L1 still serves what it has
    assert_eq!(cache.get::<i32>("app:before").await, Some(1));
    // Anything else is a miss
    assert!(cache.get::<i32>("app:missing").await.is_none());
    // Writes land in L1 but report the partial failure
    assert!(!cache.set("app:during", &2, None).await);
    assert_eq!(cache.get::<i32>("app:during").await, Some(2));
    // Deletes and invalidations degrade to L1-only
    assert!(cache.delete("app:during").await);
    let report = cache.invalidate_pattern("app:*").await.unwrap();
    assert_eq!(report.local_removed, 1);
    assert_eq!(report.remote_removed, 0);

    let remote = cache.orchestrator().remote();
    assert!(!remote.exists("app:before").await);
    assert_eq!(remote.ttl("app:before").await, RemoteTtl::Missing);
    assert!(!remote.ping().await);
    assert!(remote.stats().counters.errors >= 5);
}

/// The system recovers once L2 is reachable again
#[tokio::test]
async fn test_remote_recovery() {
    let (cache, backend) = setup_cache_system().await.unwrap();

    backend.set_available(false);
    assert!(!cache.set("site:1", &"North", None).await);

    backend.set_available(true);
    assert!(cache.set("site:1", &"North", None).await);
    assert!(backend.exists("test:site:1").await.unwrap());
}

/// Scenario: a never-connected client misses, refuses writes and deletes nothing
#[tokio::test]
async fn test_disconnected_remote_client() {
    let remote = RemoteCache::new("arcade", Duration::from_millis(100), Duration::from_secs(60));

    assert!(remote.get::<i32>("any").await.is_none());
    assert!(!remote.set("any", &1, None).await);
    assert_eq!(remote.delete_pattern("x*").await.unwrap(), 0);
    assert!(!remote.delete("any").await);
    assert!(!remote.exists("any").await);
    assert!(!remote.health_check().await);
    // Not being connected is not an error
    assert_eq!(remote.stats().counters.errors, 0);
}

/// Slow L2 calls time out and count as misses
#[tokio::test(start_paused = true)]
async fn test_remote_timeout() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    backend.set("test:slow", b"1", None).await.unwrap();
    backend.set_latency(Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    assert!(cache.get::<i32>("slow").await.is_none());
    assert!(started.elapsed() < Duration::from_secs(1));

    let stats = cache.get_stats();
    assert_eq!(stats.global.misses, 1);
    assert!(stats.remote.counters.errors >= 1);
}

/// A system built without L2 works from L1 alone
#[tokio::test]
async fn test_local_only_system() {
    let cache = CacheSystemBuilder::new()
        .with_config(test_config())
        .without_remote()
        .build()
        .await
        .unwrap();

    assert!(!cache.orchestrator().remote().is_connected());
    assert!(cache.set("operator:3", &"Arcadia", None).await);
    assert_eq!(cache.get::<String>("operator:3").await.as_deref(), Some("Arcadia"));
    assert!(cache.health_check().await);
}

/// Values that cannot be encoded are reported, never cached, never panic
#[tokio::test]
async fn test_unencodable_value() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    let mut bad = std::collections::HashMap::new();
    bad.insert(vec![1_u8, 2], "non-string map keys are not valid JSON");

    assert!(!cache.orchestrator().set("bad", &bad, SetOptions::default()).await);
    assert!(!cache.orchestrator().local().contains_key("bad"));
    assert!(backend.is_empty());
}
