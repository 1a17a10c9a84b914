//! Cache System Builder
//!
//! The composition root: turns a [`CacheConfig`] into a running
//! [`CacheSystem`] (local cache, remote client, orchestrator, warmer and the
//! background tasks that serve them).
//!
//! # Example: Redis-backed system from the environment
//!
//! ```rust,no_run
//! use arcade_cache::CacheSystemBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheSystemBuilder::from_env().build().await?;
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Custom Remote Backend
//!
//! ```rust,ignore
//! use arcade_cache::CacheSystemBuilder;
//! use std::sync::Arc;
//!
//! let cache = CacheSystemBuilder::new()
//!     .with_remote_backend(Arc::new(MyKvStore::new()))
//!     .build()
//!     .await?;
//! ```

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::codecs::JsonCodec;
use crate::config::CacheConfig;
use crate::invalidation::{
    AtomicInvalidationStats, InvalidationBroadcaster, LocalBroadcaster, spawn_local_listener,
};
use crate::local_cache::{LocalCache, spawn_expiry_sweeper};
use crate::orchestrator::CacheOrchestrator;
use crate::remote_cache::RemoteCache;
use crate::traits::{CacheCodec, RemoteBackend};
use crate::warmer::CacheWarmer;
use crate::{BackgroundTasks, CacheSystem};

/// Builder for constructing a [`CacheSystem`]
///
/// # Default Behavior
///
/// - configuration: [`CacheConfig::default`]
/// - L2: Redis at `remote_url` (feature `redis`); an unreachable server is
///   logged and the system runs with L2 degraded to no-ops
/// - codec: JSON
/// - cross-instance invalidation: Redis Pub/Sub when `invalidation_channel`
///   is set, otherwise off
pub struct CacheSystemBuilder<C: CacheCodec = JsonCodec> {
    config: CacheConfig,
    codec: C,
    remote_backend: Option<Arc<dyn RemoteBackend>>,
    remote_enabled: bool,
    broadcaster: Option<Arc<dyn InvalidationBroadcaster>>,
    local_bus: Option<LocalBroadcaster>,
}

impl CacheSystemBuilder<JsonCodec> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            codec: JsonCodec,
            remote_backend: None,
            remote_enabled: true,
            broadcaster: None,
            local_bus: None,
        }
    }

    /// Builder configured from `REDIS_URL` and `CACHE_*` variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_config(CacheConfig::from_env())
    }
}

impl Default for CacheSystemBuilder<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CacheCodec> CacheSystemBuilder<C> {
    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Encode values with `codec` instead of JSON
    pub fn with_codec<C2: CacheCodec>(self, codec: C2) -> CacheSystemBuilder<C2> {
        CacheSystemBuilder {
            config: self.config,
            codec,
            remote_backend: self.remote_backend,
            remote_enabled: self.remote_enabled,
            broadcaster: self.broadcaster,
            local_bus: self.local_bus,
        }
    }

    /// Use `backend` as L2 instead of connecting to Redis
    #[must_use]
    pub fn with_remote_backend(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.remote_backend = Some(backend);
        self.remote_enabled = true;
        self
    }

    /// Run with L1 only; every L2 operation becomes a no-op
    #[must_use]
    pub fn without_remote(mut self) -> Self {
        self.remote_backend = None;
        self.remote_enabled = false;
        self
    }

    /// Publish invalidations through `broadcaster` (publish only)
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn InvalidationBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Publish to and listen on an in-process bus shared with other systems
    #[must_use]
    pub fn with_local_broadcaster(mut self, bus: LocalBroadcaster) -> Self {
        self.local_bus = Some(bus);
        self
    }

    /// Build the system and start its background tasks
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration. Remote connection
    /// failures are not errors: they are logged and L2 stays disconnected.
    pub async fn build(self) -> Result<CacheSystem<C>> {
        let config = self.config;
        config.validate()?;
        info!(
            local_max_size = config.local_max_size,
            policy = %config.local_policy,
            namespace = %config.remote_namespace,
            "Building cache system"
        );

        let local = Arc::new(LocalCache::new(config.local_max_size, config.local_policy));
        let remote = Arc::new(RemoteCache::from_config(&config, self.codec));

        if let Some(backend) = self.remote_backend {
            remote.attach(backend);
        } else if self.remote_enabled {
            connect_remote(&remote, &config).await;
        } else {
            info!("Remote cache disabled, running with local cache only");
        }

        let mut orchestrator =
            CacheOrchestrator::new(Arc::clone(&local), Arc::clone(&remote), config.local_ttl_cap());

        let mut local_bus_rx = None;
        if let Some(bus) = &self.local_bus {
            if self.broadcaster.is_some() {
                warn!("Both a local invalidation bus and a broadcaster were given; the broadcaster is ignored");
            }
            local_bus_rx = Some(bus.subscribe());
            orchestrator = orchestrator.with_broadcaster(Arc::new(bus.clone()));
        } else if let Some(broadcaster) = self.broadcaster {
            orchestrator = orchestrator.with_broadcaster(broadcaster);
        }

        #[cfg(feature = "redis")]
        let mut subscriber = None;
        #[cfg(feature = "redis")]
        if self.local_bus.is_none() && self.remote_enabled {
            if let Some(channel) = &config.invalidation_channel {
                match redis_invalidation(&config, channel).await {
                    Ok((publisher, sub)) => {
                        orchestrator = orchestrator.with_broadcaster(Arc::new(publisher));
                        subscriber = Some(sub);
                    }
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Cross-instance invalidation unavailable");
                    }
                }
            }
        }

        let orchestrator = Arc::new(orchestrator);
        let invalidation_stats = Arc::new(AtomicInvalidationStats::default());
        let mut handles = Vec::new();

        if let Some(interval) = config.sweep_interval() {
            handles.push(spawn_expiry_sweeper(Arc::clone(&local), interval));
        }
        if let Some(rx) = local_bus_rx {
            handles.push(spawn_local_listener(
                Arc::clone(&orchestrator),
                rx,
                Arc::clone(&invalidation_stats),
            ));
        }
        #[cfg(feature = "redis")]
        if let Some(sub) = &subscriber {
            let target = Arc::clone(&orchestrator);
            handles.push(sub.start(move |message| target.apply_peer_invalidation(&message)));
        }

        let warmer = Arc::new(CacheWarmer::new(Arc::clone(&orchestrator)));

        info!(
            instance_id = %orchestrator.instance_id(),
            remote_connected = remote.is_connected(),
            "Cache system built"
        );

        Ok(CacheSystem {
            orchestrator,
            warmer,
            background: Arc::new(BackgroundTasks {
                handles: Mutex::new(handles),
                invalidation_stats,
                #[cfg(feature = "redis")]
                subscriber,
            }),
        })
    }
}

#[cfg(feature = "redis")]
async fn connect_remote<C: CacheCodec>(remote: &RemoteCache<C>, config: &CacheConfig) {
    if let Err(e) = remote
        .connect(&config.remote_url, config.remote_max_connections)
        .await
    {
        warn!(
            remote_url = %config.remote_url,
            error = %e,
            "Remote cache unavailable, continuing with local cache only"
        );
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_remote<C: CacheCodec>(_remote: &RemoteCache<C>, config: &CacheConfig) {
    warn!(
        remote_url = %config.remote_url,
        "Built without the `redis` feature and no remote backend given, running with local cache only"
    );
}

#[cfg(feature = "redis")]
async fn redis_invalidation(
    config: &CacheConfig,
    channel: &str,
) -> Result<(
    crate::invalidation::RedisInvalidationPublisher,
    crate::invalidation::InvalidationSubscriber,
)> {
    let publisher = tokio::time::timeout(
        config.socket_timeout(),
        crate::invalidation::RedisInvalidationPublisher::connect(&config.remote_url, channel),
    )
    .await
    .map_err(|_| anyhow::anyhow!("invalidation publisher connect timed out"))??;
    let subscriber = crate::invalidation::InvalidationSubscriber::new(&config.remote_url, channel)?;
    Ok((publisher, subscriber))
}
