//! Remote Cache - Shared L2 Client
//!
//! Namespaced, timeout-bounded access to the shared key-value store. The
//! client owns the connection lifecycle (`connect` / `attach` / `disconnect`)
//! and is the boundary where remote failures stop: every transport error,
//! timeout or missing connection becomes the operation's "absent" result
//! (`None`, `false`, `0`) after being logged and counted.

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codecs::JsonCodec;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::pattern::KeyPattern;
use crate::stats::{AtomicCounters, RemoteCacheStats};
use crate::traits::{CacheCodec, RemoteBackend, RemoteTtl};

/// A decoded remote value together with its encoded bytes and remaining TTL
#[derive(Debug, Clone)]
pub struct RemoteHit<T> {
    pub value: T,
    pub bytes: Vec<u8>,
    pub ttl: RemoteTtl,
}

/// L2 cache client
///
/// Keys are transmitted as `"{namespace}:{key}"`. When no backend is attached,
/// or the attached one fails, operations degrade to their miss/no-op result.
pub struct RemoteCache<C: CacheCodec = JsonCodec> {
    backend: RwLock<Option<Arc<dyn RemoteBackend>>>,
    namespace: String,
    op_timeout: Duration,
    default_ttl: Duration,
    codec: C,
    counters: AtomicCounters,
}

impl RemoteCache<JsonCodec> {
    /// Create a disconnected JSON client
    #[must_use]
    pub fn new(namespace: impl Into<String>, op_timeout: Duration, default_ttl: Duration) -> Self {
        Self::with_codec(JsonCodec, namespace, op_timeout, default_ttl)
    }
}

impl<C: CacheCodec> RemoteCache<C> {
    /// Create a disconnected client using `codec` for values
    #[must_use]
    pub fn with_codec(
        codec: C,
        namespace: impl Into<String>,
        op_timeout: Duration,
        default_ttl: Duration,
    ) -> Self {
        let namespace = namespace.into();
        info!(namespace = %namespace, codec = codec.name(), timeout = ?op_timeout, "Initializing remote cache client");

        Self {
            backend: RwLock::new(None),
            namespace,
            op_timeout,
            default_ttl,
            codec,
            counters: AtomicCounters::default(),
        }
    }

    /// Create a disconnected client from configuration
    #[must_use]
    pub fn from_config(config: &CacheConfig, codec: C) -> Self {
        Self::with_codec(
            codec,
            config.remote_namespace.clone(),
            config.socket_timeout(),
            config.default_remote_ttl(),
        )
    }

    /// Connect to Redis and attach the resulting pool
    ///
    /// # Errors
    ///
    /// Returns the connection error; the client stays disconnected and keeps
    /// serving no-op results.
    #[cfg(feature = "redis")]
    pub async fn connect(&self, redis_url: &str, max_connections: usize) -> Result<()> {
        let backend =
            crate::backends::RedisBackend::connect(redis_url, max_connections, self.op_timeout)
                .await?;
        self.attach(Arc::new(backend));
        Ok(())
    }

    /// Use `backend` for all subsequent operations, replacing any previous one
    pub fn attach(&self, backend: Arc<dyn RemoteBackend>) {
        info!(backend = backend.name(), namespace = %self.namespace, "[L2] Remote backend attached");
        *self.backend.write() = Some(backend);
    }

    /// Drop the backend; later operations return their no-op result
    pub fn disconnect(&self) {
        if let Some(backend) = self.backend.write().take() {
            info!(backend = backend.name(), "[L2] Remote backend disconnected");
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.backend.read().is_some()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Bound applied to every remote call
    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Key as transmitted to the store
    #[must_use]
    pub fn namespaced(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.namespace)
        }
    }

    /// Run one backend call under the timeout, absorbing every failure
    async fn run<T, F, Fut>(&self, op: &'static str, key: &str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn RemoteBackend>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backend = self.backend.read().clone();
        let Some(backend) = backend else {
            debug!(op, key = %key, "[L2] Not connected, skipping");
            return None;
        };

        let error = match tokio::time::timeout(self.op_timeout, call(backend)).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => CacheError::Timeout {
                op,
                timeout: self.op_timeout,
            },
        };

        self.counters.error();
        warn!(op, key = %key, kind = error.kind(), error = %error, "[L2] Remote cache call failed");
        None
    }

    /// Raw bytes for `key`
    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let full = self.namespaced(key);
        let k = full.as_str();
        let value = self
            .run("get", k, |backend| async move { backend.get(k).await })
            .await
            .flatten();

        if value.is_some() {
            self.counters.hit();
        } else {
            self.counters.miss();
        }
        value
    }

    /// Decoded value for `key`; an undecodable stored value is a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_ttl(key).await.map(|hit| hit.value)
    }

    /// Decoded value, its encoded bytes and remaining TTL
    ///
    /// An undecodable stored value counts as a miss and an error. Corrupt
    /// bytes are deleted best-effort; a well-formed value of another type
    /// is left in place.
    pub async fn get_with_ttl<T: DeserializeOwned>(&self, key: &str) -> Option<RemoteHit<T>> {
        let full = self.namespaced(key);
        let k = full.as_str();
        let Some((bytes, ttl)) = self
            .run("get", k, |backend| async move { backend.get_with_ttl(k).await })
            .await
            .flatten()
        else {
            self.counters.miss();
            return None;
        };

        match self.codec.deserialize::<T>(&bytes) {
            Ok(value) => {
                self.counters.hit();
                debug!(key = %key, "[L2] Hit");
                Some(RemoteHit { value, bytes, ttl })
            }
            Err(e) => {
                self.counters.miss();
                self.counters.error();
                if self.codec.is_well_formed(&bytes) {
                    warn!(key = %key, codec = self.codec.name(), error = %e, "[L2] Entry does not decode as the requested type");
                } else {
                    warn!(key = %key, codec = self.codec.name(), error = %e, "[L2] Discarding undecodable entry");
                    self.run("delete", k, |backend| async move { backend.delete(k).await })
                        .await;
                }
                None
            }
        }
    }

    /// Encode and store `value`; `None` applies the default remote TTL
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match self.codec.serialize(value) {
            Ok(bytes) => self.set_raw(key, &bytes, ttl).await,
            Err(e) => {
                self.counters.error();
                warn!(key = %key, codec = self.codec.name(), error = %e, "[L2] Failed to encode value");
                false
            }
        }
    }

    /// Store already-encoded bytes
    pub async fn set_raw(&self, key: &str, bytes: &[u8], ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let full = self.namespaced(key);
        let k = full.as_str();
        let stored = self
            .run("set", k, |backend| async move {
                backend.set(k, bytes, Some(ttl)).await
            })
            .await
            .is_some();

        if stored {
            self.counters.set();
            debug!(key = %key, ttl = ?ttl, "[L2] Stored");
        }
        stored
    }

    /// Delete `key`, returning whether it existed
    pub async fn delete(&self, key: &str) -> bool {
        let full = self.namespaced(key);
        let k = full.as_str();
        let removed = self
            .run("delete", k, |backend| async move { backend.delete(k).await })
            .await
            .unwrap_or(false);

        if removed {
            self.counters.delete();
        }
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        let full = self.namespaced(key);
        let k = full.as_str();
        self.run("exists", k, |backend| async move { backend.exists(k).await })
            .await
            .unwrap_or(false)
    }

    /// Remaining lifetime; [`RemoteTtl::Missing`] when unknown
    pub async fn ttl(&self, key: &str) -> RemoteTtl {
        let full = self.namespaced(key);
        let k = full.as_str();
        self.run("ttl", k, |backend| async move { backend.ttl(k).await })
            .await
            .unwrap_or(RemoteTtl::Missing)
    }

    /// Delete every key matching the glob `pattern` within the namespace
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] for a malformed pattern. Remote
    /// failures are absorbed and reported as `Ok(0)`.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let pattern = KeyPattern::parse(pattern)?;
        Ok(self.delete_matching(&pattern).await)
    }

    /// Delete every key matching an already-validated pattern
    pub async fn delete_matching(&self, pattern: &KeyPattern) -> u64 {
        let full = self.namespaced(pattern.as_str());
        let p = full.as_str();
        let removed = self
            .run("delete_pattern", p, |backend| async move {
                backend.delete_pattern(p).await
            })
            .await
            .unwrap_or(0);

        self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
        info!(pattern = %full, removed, "[L2] Pattern invalidation");
        removed
    }

    /// Probe the store; `false` when disconnected or unreachable
    pub async fn ping(&self) -> bool {
        self.run("ping", "-", |backend| async move { backend.ping().await })
            .await
            .is_some()
    }

    pub async fn health_check(&self) -> bool {
        self.ping().await
    }

    pub fn record_error(&self) {
        self.counters.error();
    }

    #[must_use]
    pub fn stats(&self) -> RemoteCacheStats {
        let counters = self.counters.snapshot();
        let backend = self
            .backend
            .read()
            .as_ref()
            .map_or("none", |backend| backend.name());

        RemoteCacheStats {
            hit_rate: counters.hit_rate(),
            counters,
            connected: self.is_connected(),
            backend,
            namespace: self.namespace.clone(),
        }
    }
}

impl<C: CacheCodec> std::fmt::Debug for RemoteCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("namespace", &self.namespace)
            .field("connected", &self.is_connected())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
