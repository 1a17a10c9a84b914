//! Integration tests for cache invalidation
//!
//! Tests cover:
//! - Single-key delete across both levels
//! - Pattern invalidation (exact in L2, substring-based in L1)
//! - Post-commit write events
//! - Cross-instance L1 invalidation over an in-process bus

mod common;

use arcade_cache::{
    CacheError, CacheSystemBuilder, InvalidationAction, InvalidationBroadcaster, InvalidationMessage,
    LocalBroadcaster, MemoryBackend, RemoteBackend, WriteEvent, async_trait, keys,
};
use common::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A key present in both levels misses right after delete
#[tokio::test]
async fn test_delete_then_miss() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    let key = test_key("delete");

    cache.set(&key, &test_data::json_app(1), None).await;
    assert!(cache.orchestrator().local().contains_key(&key));
    assert!(backend.exists(&format!("test:{key}")).await.unwrap());

    assert!(cache.delete(&key).await);
    assert!(cache.get::<serde_json::Value>(&key).await.is_none());
    assert!(!cache.delete(&key).await);
}

/// A delete succeeds locally even while L2 is down
#[tokio::test]
async fn test_delete_with_remote_down() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    cache.set("operator:1", &"Arcadia", None).await;

    backend.set_available(false);
    assert!(cache.delete("operator:1").await);
    assert!(!cache.orchestrator().local().contains_key("operator:1"));
}

/// Pattern invalidation removes exact matches and leaves the rest
#[tokio::test]
async fn test_pattern_invalidation() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    let v = test_data::Authorization::new("op1", "appA");

    cache.set("auth:op1:appA", &v, None).await;
    cache.set("auth:op1:appB", &v, None).await;
    cache.set("auth:op2:appA", &v, None).await;

    let report = cache.invalidate_pattern("auth:op1:*").await.unwrap();
    assert_eq!(report.local_removed, 2);
    assert_eq!(report.remote_removed, 2);

    assert!(cache.get::<test_data::Authorization>("auth:op1:appA").await.is_none());
    assert!(cache.get::<test_data::Authorization>("auth:op1:appB").await.is_none());
    assert_eq!(
        cache.get::<test_data::Authorization>("auth:op2:appA").await,
        Some(v)
    );
    assert_eq!(backend.keys(), vec!["test:auth:op2:appA".to_string()]);
}

/// Pattern invalidation is scoped to this cache's namespace in L2
#[tokio::test]
async fn test_pattern_invalidation_namespaced() {
    let (cache, backend) = setup_cache_system().await.unwrap();
    backend.set("other:site:1", b"1", None).await.unwrap();
    cache.set("site:1", &1, None).await;

    let report = cache.invalidate_pattern("site:*").await.unwrap();
    assert_eq!(report.remote_removed, 1);
    assert!(backend.exists("other:site:1").await.unwrap());
}

/// `*` clears L1 entirely
#[tokio::test]
async fn test_match_all_pattern() {
    let (cache, _backend) = setup_cache_system().await.unwrap();
    for i in 0..5 {
        cache.set(&format!("app:{i}"), &i, None).await;
    }

    let report = cache.invalidate_pattern("*").await.unwrap();
    assert_eq!(report.local_removed, 5);
    assert_eq!(report.remote_removed, 5);
    assert!(cache.orchestrator().local().is_empty());
}

/// Malformed patterns are rejected and nothing is removed
#[tokio::test]
async fn test_invalid_pattern_rejected() {
    let (cache, _backend) = setup_cache_system().await.unwrap();
    cache.set("auth:op1:appA", &1, None).await;

    for pattern in ["", "auth:[op1", "auth op1:*"] {
        let result = cache.invalidate_pattern(pattern).await;
        assert!(
            matches!(result, Err(CacheError::InvalidPattern { .. })),
            "pattern {pattern:?} should be rejected"
        );
    }
    assert_eq!(cache.get::<i32>("auth:op1:appA").await, Some(1));
}

/// Application writes drop the entity, the list and its authorizations
#[tokio::test]
async fn test_after_commit_application_updated() {
    let (cache, _backend) = setup_cache_system().await.unwrap();
    let app = test_data::Application::new("beat-saber");

    cache.set(&keys::app("beat-saber"), &app, None).await;
    cache.set(&keys::app_list(), &vec![app.clone()], None).await;
    cache.set(&keys::authorization("op1", "beat-saber"), &1, None).await;
    cache.set(&keys::authorization("op2", "beat-saber"), &2, None).await;
    cache.set(&keys::authorization("op1", "pistol-whip"), &3, None).await;
    cache.set(&keys::app("pistol-whip"), &app, None).await;

    cache
        .invalidator()
        .after_commit(&WriteEvent::ApplicationUpdated {
            app_code: "beat-saber".to_string(),
        })
        .await;

    assert!(cache.get::<test_data::Application>(&keys::app("beat-saber")).await.is_none());
    assert!(cache.get::<Vec<test_data::Application>>(&keys::app_list()).await.is_none());
    assert!(cache.get::<i32>(&keys::authorization("op1", "beat-saber")).await.is_none());
    assert!(cache.get::<i32>(&keys::authorization("op2", "beat-saber")).await.is_none());

    assert_eq!(cache.get::<i32>(&keys::authorization("op1", "pistol-whip")).await, Some(3));
    assert!(cache.get::<test_data::Application>(&keys::app("pistol-whip")).await.is_some());
}

/// Authorization writes drop every cached authorization of the operator
#[tokio::test]
async fn test_after_commit_authorization_revoked() {
    let (cache, _backend) = setup_cache_system().await.unwrap();

    cache.set(&keys::authorization("op1", "appA"), &1, None).await;
    cache.set(&keys::authorization("op1", "appB"), &2, None).await;
    cache.set(&keys::authorization("op2", "appA"), &3, None).await;

    cache
        .invalidator()
        .after_commit(&WriteEvent::AuthorizationRevoked {
            operator_id: "op1".to_string(),
            app_code: "appA".to_string(),
        })
        .await;

    assert!(cache.get::<i32>(&keys::authorization("op1", "appA")).await.is_none());
    assert!(cache.get::<i32>(&keys::authorization("op1", "appB")).await.is_none());
    assert_eq!(cache.get::<i32>(&keys::authorization("op2", "appA")).await, Some(3));
}

/// A delete on one instance drops the peer's L1 copy
#[tokio::test]
async fn test_peer_delete_propagates() {
    let (first, second, _backend) = setup_peer_systems().await.unwrap();

    first.set("site:4", &"Harbour", None).await;
    // Second instance reads through and back-fills its own L1
    assert_eq!(second.get::<String>("site:4").await.as_deref(), Some("Harbour"));
    assert!(second.orchestrator().local().contains_key("site:4"));

    first.delete("site:4").await;

    let peer_local = second.orchestrator().local().clone();
    assert!(wait_for(|| !peer_local.contains_key("site:4"), 1000).await);
    assert!(second.get::<String>("site:4").await.is_none());

    let stats = second.invalidation_stats();
    assert!(stats.messages_received >= 1);
    assert!(stats.entries_removed >= 1);
}

/// A pattern invalidation on one instance drops matching peer L1 entries
#[tokio::test]
async fn test_peer_pattern_propagates() {
    let (first, second, _backend) = setup_peer_systems().await.unwrap();

    for app in ["appA", "appB"] {
        second
            .orchestrator()
            .set(
                &keys::authorization("op1", app),
                &1,
                arcade_cache::SetOptions::default().local_only(),
            )
            .await;
    }
    second.set(&keys::authorization("op2", "appA"), &2, None).await;

    first.invalidate_pattern("auth:op1:*").await.unwrap();

    let peer_local = second.orchestrator().local().clone();
    assert!(wait_for(|| peer_local.len() == 1, 1000).await);
    assert!(peer_local.contains_key(&keys::authorization("op2", "appA")));
}

/// An instance ignores its own broadcasts
#[tokio::test]
async fn test_own_messages_ignored() {
    let (first, _second, _backend) = setup_peer_systems().await.unwrap();

    first.set("operator:5", &5, None).await;
    first.delete("operator:5").await;
    first.set("operator:5", &6, None).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.get::<i32>("operator:5").await, Some(6));
    assert_eq!(first.invalidation_stats().entries_removed, 0);
}

#[derive(Default)]
struct CountingBroadcaster {
    published: AtomicUsize,
}

#[async_trait]
impl InvalidationBroadcaster for CountingBroadcaster {
    async fn publish(&self, _message: &InvalidationMessage) -> arcade_cache::Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The local bus takes precedence over a separately supplied broadcaster
#[tokio::test]
async fn test_local_bus_overrides_broadcaster() {
    let bus = LocalBroadcaster::default();
    let mut listener = bus.subscribe();
    let counting = Arc::new(CountingBroadcaster::default());

    let cache = CacheSystemBuilder::new()
        .with_config(test_config())
        .with_remote_backend(Arc::new(MemoryBackend::new()))
        .with_broadcaster(counting.clone())
        .with_local_broadcaster(bus)
        .build()
        .await
        .unwrap();

    cache.set("site:9", &"Pier", None).await;
    cache.delete("site:9").await;

    let message = tokio::time::timeout(Duration::from_secs(1), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(message.action, InvalidationAction::Remove { ref key } if key == "site:9"));
    assert_eq!(counting.published.load(Ordering::SeqCst), 0);
}
