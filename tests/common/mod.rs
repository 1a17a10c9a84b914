//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - In-memory L2 systems with fault injection
//! - Redis connection helpers (for the ignored live tests)
//! - Test data generators

#![allow(dead_code)]

use anyhow::Result;
use arcade_cache::{CacheConfig, CacheSystem, CacheSystemBuilder, LocalBroadcaster, MemoryBackend};
use std::sync::Arc;
use std::time::Duration;

/// Get Redis URL from environment or use default
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Create a test key with unique suffix
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Configuration used by the in-memory systems
pub fn test_config() -> CacheConfig {
    CacheConfig {
        local_max_size: 100,
        remote_namespace: "test".to_string(),
        remote_socket_timeout_ms: 200,
        default_remote_ttl_secs: 1800,
        default_local_ttl_secs: 300,
        local_sweep_interval_secs: 0,
        ..CacheConfig::default()
    }
}

/// Cache system over a fresh in-memory L2, returned with the backend
pub async fn setup_cache_system() -> Result<(CacheSystem, Arc<MemoryBackend>)> {
    setup_with_config(test_config()).await
}

pub async fn setup_with_config(config: CacheConfig) -> Result<(CacheSystem, Arc<MemoryBackend>)> {
    let backend = Arc::new(MemoryBackend::new());
    let cache = CacheSystemBuilder::new()
        .with_config(config)
        .with_remote_backend(backend.clone())
        .build()
        .await?;
    Ok((cache, backend))
}

/// Two systems sharing one L2 store and one invalidation bus
pub async fn setup_peer_systems() -> Result<(CacheSystem, CacheSystem, Arc<MemoryBackend>)> {
    let backend = Arc::new(MemoryBackend::new());
    let bus = LocalBroadcaster::default();

    let mut systems = Vec::with_capacity(2);
    for _ in 0..2 {
        let cache = CacheSystemBuilder::new()
            .with_config(test_config())
            .with_remote_backend(backend.clone())
            .with_local_broadcaster(bus.clone())
            .build()
            .await?;
        systems.push(cache);
    }

    let second = systems.pop().ok_or_else(|| anyhow::anyhow!("missing system"))?;
    let first = systems.pop().ok_or_else(|| anyhow::anyhow!("missing system"))?;
    Ok((first, second, backend))
}

/// Generate test data of various types
pub mod test_data {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Application {
        pub code: String,
        pub title: String,
        pub max_players: u32,
    }

    impl Application {
        pub fn new(code: &str) -> Self {
            Self {
                code: code.to_string(),
                title: format!("Title of {code}"),
                max_players: 4,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Authorization {
        pub operator_id: String,
        pub app_code: String,
        pub licensed_seats: u32,
    }

    impl Authorization {
        pub fn new(operator_id: &str, app_code: &str) -> Self {
            Self {
                operator_id: operator_id.to_string(),
                app_code: app_code.to_string(),
                licensed_seats: 8,
            }
        }
    }

    /// Generate JSON test data
    pub fn json_app(id: u64) -> serde_json::Value {
        serde_json::json!({
            "code": format!("app-{id}"),
            "title": format!("Application {id}"),
            "genres": ["rhythm", "fitness"],
        })
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(mut condition: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    condition()
}

/// Assert on a field of the orchestrator statistics
#[macro_export]
macro_rules! assert_cache_stats {
    ($cache:expr, $field:ident == $value:expr) => {
        let stats = $cache.get_stats();
        assert_eq!(
            stats.global.$field,
            $value,
            "Expected {} == {}, got {}",
            stringify!($field),
            $value,
            stats.global.$field
        );
    };
    ($cache:expr, $field:ident >= $value:expr) => {
        let stats = $cache.get_stats();
        assert!(
            stats.global.$field >= $value,
            "Expected {} >= {}, got {}",
            stringify!($field),
            $value,
            stats.global.$field
        );
    };
}
