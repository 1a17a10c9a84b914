//! Cache Orchestrator - Unified L1 + L2 Operations
//!
//! Composes the local (L1) and remote (L2) levels into one read/write
//! surface:
//!
//! - reads check L1, then L2, back-filling L1 on an L2 hit
//! - writes go to both levels (L1 TTL capped)
//! - deletes and pattern invalidations span both levels and, when a
//!   broadcaster is attached, reach peer instances' L1 as well
//!
//! No L1 lock is ever held while an L2 call is in flight.

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codecs::JsonCodec;
use crate::error::Result;
use crate::invalidation::{InvalidationAction, InvalidationBroadcaster, InvalidationMessage};
use crate::local_cache::LocalCache;
use crate::pattern::KeyPattern;
use crate::remote_cache::RemoteCache;
use crate::stats::{OrchestratorStats, StatsSnapshot};
use crate::traits::{CacheCodec, RemoteTtl};

/// RAII cleanup guard for in-flight request tracking
/// Ensures that entries are removed from `DashMap` even on early return or panic
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// TTL tiers for different kinds of data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Real-time data - 10 seconds TTL
    RealTime,
    /// Short-term data - 5 minutes TTL
    ShortTerm,
    /// Medium-term data - 1 hour TTL
    MediumTerm,
    /// Long-term data - 3 hours TTL
    LongTerm,
    /// Custom TTL
    Custom(Duration),
    /// The configured default remote TTL
    #[default]
    Default,
}

impl CacheStrategy {
    /// Convert strategy to duration
    #[must_use]
    pub fn to_duration(&self, default_ttl: Duration) -> Duration {
        match self {
            Self::RealTime => Duration::from_secs(10),
            Self::ShortTerm => Duration::from_secs(300),
            Self::MediumTerm => Duration::from_secs(3600),
            Self::LongTerm => Duration::from_secs(10800),
            Self::Custom(duration) => *duration,
            Self::Default => default_ttl,
        }
    }
}

/// Per-call read behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Fall through to L2 on an L1 miss
    pub remote: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { remote: true }
    }
}

impl ReadOptions {
    #[must_use]
    pub fn local_only() -> Self {
        Self { remote: false }
    }
}

/// Per-call write behaviour
///
/// `ttl` is the L2 TTL (default: configured remote TTL). `local_ttl` defaults
/// to `ttl`; either way the L1 TTL is capped at the configured local cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub local_ttl: Option<Duration>,
    pub remote: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            local_ttl: None,
            remote: true,
        }
    }
}

impl SetOptions {
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn local_ttl(mut self, local_ttl: Duration) -> Self {
        self.local_ttl = Some(local_ttl);
        self
    }

    /// Skip the L2 write
    #[must_use]
    pub fn local_only(mut self) -> Self {
        self.remote = false;
        self
    }
}

/// Entries removed by one pattern invalidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub local_removed: usize,
    pub remote_removed: u64,
}

/// Result of probing both levels
///
/// The system is healthy when L1 works; an unreachable L2 only degrades it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub local: bool,
    pub remote: bool,
    pub remote_connected: bool,
}

/// Multi-level cache orchestrator
///
/// Process-wide: construct one (usually through
/// [`CacheSystemBuilder`](crate::CacheSystemBuilder)) and share it behind an
/// `Arc`.
pub struct CacheOrchestrator<C: CacheCodec = JsonCodec> {
    local: Arc<LocalCache>,
    remote: Arc<RemoteCache<C>>,
    local_ttl_cap: Duration,
    /// Statistics
    total_requests: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    backfills: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    pattern_invalidations: AtomicU64,
    errors: AtomicU64,
    /// In-flight computations, one async mutex per key (stampede protection)
    in_flight_requests: DashMap<String, Arc<Mutex<()>>>,
    broadcaster: Option<Arc<dyn InvalidationBroadcaster>>,
    instance_id: String,
}

impl<C: CacheCodec> CacheOrchestrator<C> {
    /// Compose two levels; L1 TTLs never exceed `local_ttl_cap`
    #[must_use]
    pub fn new(local: Arc<LocalCache>, remote: Arc<RemoteCache<C>>, local_ttl_cap: Duration) -> Self {
        let instance_id = uuid::Uuid::new_v4().to_string();
        info!(instance_id = %instance_id, local_ttl_cap = ?local_ttl_cap, "Initializing cache orchestrator");

        Self {
            local,
            remote,
            local_ttl_cap,
            total_requests: AtomicU64::new(0),
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backfills: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            pattern_invalidations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            in_flight_requests: DashMap::new(),
            broadcaster: None,
            instance_id,
        }
    }

    /// Publish deletes and pattern invalidations to peer instances
    #[must_use]
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn InvalidationBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Identifier stamped on broadcast messages
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn local(&self) -> &Arc<LocalCache> {
        &self.local
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<RemoteCache<C>> {
        &self.remote
    }

    #[must_use]
    pub fn local_ttl_cap(&self) -> Duration {
        self.local_ttl_cap
    }

    /// Get value from cache (L1 first, then L2 with back-fill)
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_options(key, ReadOptions::default()).await
    }

    /// Get value, optionally skipping L2
    pub async fn get_with_options<T: DeserializeOwned>(
        &self,
        key: &str,
        options: ReadOptions,
    ) -> Option<T> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.read_local(key) {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "[L1] Hit");
            return Some(value);
        }

        if options.remote {
            if let Some(value) = self.read_remote(key).await {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss");
        None
    }

    fn read_local<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.local.get(key)?;
        match self.remote.codec().deserialize::<T>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.local.record_error();
                if self.remote.codec().is_well_formed(&bytes) {
                    warn!(key = %key, error = %e, "[L1] Entry does not decode as the requested type");
                } else {
                    self.local.delete(key);
                    warn!(key = %key, error = %e, "[L1] Discarding undecodable entry");
                }
                None
            }
        }
    }

    async fn read_remote<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let hit = self.remote.get_with_ttl::<T>(key).await?;
        self.backfill(key, hit.bytes, hit.ttl);
        Some(hit.value)
    }

    /// Copy an L2 hit into L1 for `min(remaining L2 TTL, local cap)`
    fn backfill(&self, key: &str, bytes: Vec<u8>, ttl: RemoteTtl) {
        let local_ttl = ttl
            .remaining()
            .map_or(self.local_ttl_cap, |remaining| remaining.min(self.local_ttl_cap));
        if local_ttl.is_zero() {
            return;
        }

        self.local.set(key, Bytes::from(bytes), Some(local_ttl));
        self.backfills.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?local_ttl, "[L2 -> L1] Back-filled");
    }

    /// Write to L1 and (unless disabled) L2
    ///
    /// Returns true only if every attempted write succeeded. L2 is attempted
    /// when enabled for the call and a backend is connected. A partial failure
    /// is not rolled back.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) -> bool {
        let bytes = match self.remote.codec().serialize(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.local.record_error();
                warn!(key = %key, codec = self.remote.codec().name(), error = %e, "Failed to encode value, not cached");
                return false;
            }
        };

        let remote_ttl = options.ttl.unwrap_or_else(|| self.remote.default_ttl());
        let local_ttl = options.local_ttl.unwrap_or(remote_ttl).min(self.local_ttl_cap);

        let local_ok = self.local.set(key, bytes.clone(), Some(local_ttl));
        // A disconnected L2 is not attempted; a failing connected one is
        let remote_attempted = options.remote && self.remote.is_connected();
        let remote_ok = if remote_attempted {
            self.remote.set_raw(key, &bytes, Some(remote_ttl)).await
        } else {
            true
        };

        self.sets.fetch_add(1, Ordering::Relaxed);
        if local_ok && remote_ok {
            debug!(key = %key, ttl = ?remote_ttl, local_ttl = ?local_ttl, remote = remote_attempted, "[L1+L2] Cached");
            true
        } else {
            warn!(key = %key, local_ok, remote_ok, "Partial cache write");
            false
        }
    }

    /// Set value with a TTL tier (both L1 and L2)
    pub async fn set_with_strategy<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        strategy: CacheStrategy,
    ) -> bool {
        let ttl = strategy.to_duration(self.remote.default_ttl());
        self.set(key, value, SetOptions::with_ttl(ttl)).await
    }

    /// Delete from both levels; true if either level had the key
    pub async fn delete(&self, key: &str) -> bool {
        let local_removed = self.local.delete(key);
        let remote_removed = self.remote.delete(key).await;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        self.broadcast(InvalidationAction::Remove {
            key: key.to_string(),
        })
        .await;

        debug!(key = %key, local_removed, remote_removed, "[L1+L2] Deleted");
        local_removed || remote_removed
    }

    /// Remove a key family from both levels
    ///
    /// `*` clears L1 entirely. Any other pattern removes every L1 key that
    /// contains its longest literal run (approximate), while L2 deletes exact
    /// glob matches. Stale L1 survivors are bounded by the local TTL cap.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`](crate::CacheError::InvalidPattern)
    /// for a malformed pattern. Nothing is removed in that case.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<InvalidationReport> {
        let pattern = KeyPattern::parse(pattern)?;

        let local_removed = self.local.remove_matching(&pattern);
        let remote_removed = self.remote.delete_matching(&pattern).await;
        self.pattern_invalidations.fetch_add(1, Ordering::Relaxed);

        let action = if pattern.is_match_all() {
            InvalidationAction::Clear
        } else {
            InvalidationAction::RemovePattern {
                pattern: pattern.as_str().to_string(),
            }
        };
        self.broadcast(action).await;

        info!(pattern = %pattern.as_str(), local_removed, remote_removed, "Pattern invalidation");
        Ok(InvalidationReport {
            local_removed,
            remote_removed,
        })
    }

    /// Apply a peer instance's invalidation to L1; own messages are ignored
    ///
    /// Returns the number of L1 entries removed.
    pub fn apply_peer_invalidation(&self, message: &InvalidationMessage) -> usize {
        if message.origin == self.instance_id {
            return 0;
        }

        let removed = match &message.action {
            InvalidationAction::Remove { key } => usize::from(self.local.delete(key)),
            InvalidationAction::RemovePattern { pattern } => match KeyPattern::parse(pattern) {
                Ok(pattern) => self.local.remove_matching(&pattern),
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(origin = %message.origin, error = %e, "Ignoring peer invalidation with bad pattern");
                    0
                }
            },
            InvalidationAction::Clear => self.local.clear(),
        };

        debug!(origin = %message.origin, action = ?message.action, removed, "[L1] Applied peer invalidation");
        removed
    }

    async fn broadcast(&self, action: InvalidationAction) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        let message = InvalidationMessage::new(self.instance_id.clone(), action);
        let timeout = self.remote.op_timeout();

        let failure = match tokio::time::timeout(timeout, broadcaster.publish(&message)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("publish timed out after {timeout:?}"),
        };

        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(action = ?message.action, error = %failure, "Failed to broadcast invalidation");
    }

    /// Get or compute a value with cache stampede protection across L1+L2+compute
    ///
    /// Concurrent callers missing the same key queue behind a per-key async
    /// mutex; only the first one runs `compute_fn`, the rest find the value in
    /// L1 once it is released. The computed value is stored with `strategy`.
    ///
    /// # Errors
    ///
    /// Returns the error from `compute_fn`. Cache failures never surface.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        strategy: CacheStrategy,
        compute_fn: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = self.read_local(key) {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let lock = self
            .in_flight_requests
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let _cleanup_guard = CleanupGuard {
            map: &self.in_flight_requests,
            key: key.to_string(),
        };

        // Another caller may have filled L1 while this one waited
        if let Some(value) = self.read_local(key) {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        if let Some(value) = self.read_remote(key).await {
            self.l2_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Computing fresh value (stampede protected)");
        let value = compute_fn().await?;

        if !self.set_with_strategy(key, &value, strategy).await {
            warn!(key = %key, "Computed value was not fully cached");
        }
        Ok(value)
    }

    /// Round-trip L1 and ping L2
    pub async fn health_check(&self) -> HealthReport {
        let local = self.local.health_check();
        let remote = self.remote.health_check().await;

        HealthReport {
            healthy: local,
            local,
            remote,
            remote_connected: self.remote.is_connected(),
        }
    }

    /// Orchestrator counters merged with each level's own statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_stats(&self) -> StatsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let hits = l1_hits + l2_hits;
        let (hit_rate, l1_hit_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                hits as f64 / total_requests as f64,
                l1_hits as f64 / total_requests as f64,
            )
        };

        StatsSnapshot {
            global: OrchestratorStats {
                total_requests,
                l1_hits,
                l2_hits,
                hits,
                misses: self.misses.load(Ordering::Relaxed),
                hit_rate,
                l1_hit_rate,
                backfills: self.backfills.load(Ordering::Relaxed),
                sets: self.sets.load(Ordering::Relaxed),
                deletes: self.deletes.load(Ordering::Relaxed),
                pattern_invalidations: self.pattern_invalidations.load(Ordering::Relaxed),
                errors: self.errors.load(Ordering::Relaxed),
                in_flight_requests: self.in_flight_requests.len(),
            },
            local: self.local.stats(),
            remote: self.remote.stats(),
        }
    }
}

impl<C: CacheCodec> std::fmt::Debug for CacheOrchestrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOrchestrator")
            .field("instance_id", &self.instance_id)
            .field("local_ttl_cap", &self.local_ttl_cap)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
