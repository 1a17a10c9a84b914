//! Arcade Cache
//!
//! Two-level caching for the arcade licensing backend:
//! - **L1**: bounded in-process cache with TTL and LRU, FIFO or TTL-first eviction
//! - **L2**: shared Redis cache with namespacing and glob invalidation
//! - **Orchestrator**: L1 then L2 lookups, L2-to-L1 back-fill, write-through
//!   sets, pattern invalidation and stampede-protected computes
//! - **Warmer**: bounded-concurrency pre-population of `warm:*` entries
//! - **Invalidation**: post-commit hooks plus optional cross-instance fan-out
//!
//! L2 is optional at runtime. When Redis is unreachable every remote operation
//! degrades to a no-op and the system keeps serving from L1.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use arcade_cache::CacheSystemBuilder;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     arcade_cache::init_tracing("info");
//!     let cache = CacheSystemBuilder::from_env().build().await?;
//!
//!     let data = serde_json::json!({"code": "beat-saber", "max_players": 4});
//!     cache.set("app:beat-saber", &data, Some(Duration::from_secs(300))).await;
//!
//!     if let Some(app) = cache.get::<serde_json::Value>("app:beat-saber").await {
//!         tracing::info!(%app, "Cached application");
//!     }
//!
//!     let stats = cache.get_stats();
//!     tracing::info!(hit_rate = stats.global.hit_rate, "Cache statistics");
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Request -> L1 (local) -> L2 (Redis) -> compute / database
//!            hit: return   hit: back-fill L1     miss: store in L1 + L2
//! ```

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod backends;
pub mod builder;
pub mod codecs;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod keys;
pub mod local_cache;
pub mod logging;
pub mod orchestrator;
pub mod pattern;
pub mod remote_cache;
pub mod stats;
pub mod traits;
pub mod typed;
pub mod warmer;

pub use backends::MemoryBackend;
#[cfg(feature = "redis")]
pub use backends::RedisBackend;
pub use builder::CacheSystemBuilder;
pub use codecs::JsonCodec;
#[cfg(feature = "msgpack")]
pub use codecs::MsgPackCodec;
pub use config::{CacheConfig, EvictionPolicy};
pub use error::{CacheError, Result};
pub use invalidation::{
    CacheInvalidator, InvalidationAction, InvalidationBroadcaster, InvalidationMessage,
    InvalidationStats, LocalBroadcaster, WriteEvent,
};
pub use local_cache::{EntryInfo, LocalCache};
pub use logging::init_tracing;
pub use orchestrator::{
    CacheOrchestrator, CacheStrategy, HealthReport, InvalidationReport, ReadOptions, SetOptions,
};
pub use pattern::KeyPattern;
pub use remote_cache::{RemoteCache, RemoteHit};
pub use stats::StatsSnapshot;
pub use traits::{CacheCodec, RemoteBackend, RemoteTtl};
pub use typed::TypedCache;
pub use warmer::{CacheWarmer, Producer, WarmReport, producer};

// Re-export async_trait for custom RemoteBackend / InvalidationBroadcaster impls
pub use async_trait::async_trait;

use invalidation::AtomicInvalidationStats;

/// Tasks owned by a running [`CacheSystem`]
pub(crate) struct BackgroundTasks {
    pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) invalidation_stats: Arc<AtomicInvalidationStats>,
    #[cfg(feature = "redis")]
    pub(crate) subscriber: Option<invalidation::InvalidationSubscriber>,
}

/// Main entry point: a fully wired two-level cache
///
/// Built by [`CacheSystemBuilder`]. Cloning is cheap and every clone shares
/// the same caches and background tasks.
///
/// # Example
///
/// ```rust,no_run
/// use arcade_cache::CacheSystemBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let cache = CacheSystemBuilder::new().without_remote().build().await?;
///
///     cache.set("site:12", &"Downtown", None).await;
///     assert_eq!(cache.get::<String>("site:12").await.as_deref(), Some("Downtown"));
///
///     cache.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct CacheSystem<C: CacheCodec = JsonCodec> {
    orchestrator: Arc<CacheOrchestrator<C>>,
    warmer: Arc<CacheWarmer<C>>,
    background: Arc<BackgroundTasks>,
}

impl<C: CacheCodec> Clone for CacheSystem<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            warmer: Arc::clone(&self.warmer),
            background: Arc::clone(&self.background),
        }
    }
}

impl<C: CacheCodec> CacheSystem<C> {
    /// The orchestrator behind every operation
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<CacheOrchestrator<C>> {
        &self.orchestrator
    }

    #[must_use]
    pub fn warmer(&self) -> &Arc<CacheWarmer<C>> {
        &self.warmer
    }

    /// Post-commit invalidation hook for write paths
    #[must_use]
    pub fn invalidator(&self) -> CacheInvalidator<C> {
        CacheInvalidator::new(Arc::clone(&self.orchestrator))
    }

    /// Typed view over `{prefix}:{id}` keys
    #[must_use]
    pub fn typed<T>(&self, prefix: impl Into<String>, strategy: CacheStrategy) -> TypedCache<T, C>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        TypedCache::new(Arc::clone(&self.orchestrator), prefix, strategy)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.orchestrator.get(key).await
    }

    /// Store in both levels; `ttl` of `None` uses the remote default TTL
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let options = SetOptions {
            ttl,
            ..SetOptions::default()
        };
        self.orchestrator.set(key, value, options).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.orchestrator.delete(key).await
    }

    /// Remove every key matching `pattern` from both levels
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<InvalidationReport> {
        self.orchestrator.invalidate_pattern(pattern).await
    }

    #[must_use]
    pub fn get_stats(&self) -> StatsSnapshot {
        self.orchestrator.get_stats()
    }

    /// Counters of peer invalidation messages applied by this system
    #[must_use]
    pub fn invalidation_stats(&self) -> InvalidationStats {
        #[cfg(feature = "redis")]
        if let Some(subscriber) = &self.background.subscriber {
            return subscriber.stats();
        }
        self.background.invalidation_stats.snapshot()
    }

    /// Health of both levels
    ///
    /// Returns `true` while L1 works. A failing L2 is reported but tolerated.
    pub async fn health_check(&self) -> bool {
        let report = self.orchestrator.health_check().await;

        if report.local && report.remote {
            info!("Cache health check passed");
        } else {
            warn!(
                local_ok = report.local,
                remote_ok = report.remote,
                remote_connected = report.remote_connected,
                "Cache health check - partial failure"
            );
        }
        report.healthy
    }

    /// Stop warm runs and background tasks, then drop the remote connection
    pub async fn shutdown(&self) {
        let cancelled = self.warmer.cancel_all().await;

        #[cfg(feature = "redis")]
        if let Some(subscriber) = &self.background.subscriber {
            subscriber.shutdown();
        }

        let handles = std::mem::take(&mut *self.background.handles.lock());
        let tasks = handles.len();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.orchestrator.remote().disconnect();
        info!(cancelled_warm_runs = cancelled, background_tasks = tasks, "Cache system shut down");
    }
}

impl<C: CacheCodec> std::fmt::Debug for CacheSystem<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSystem")
            .field("instance_id", &self.orchestrator.instance_id())
            .field("warmer", &self.warmer)
            .finish_non_exhaustive()
    }
}
