//! In-Memory Remote Backend
//!
//! A `DashMap`-backed stand-in for the networked store. Single-node
//! deployments can run with it as the L2 level; tests use its fault switches
//! to simulate an unreachable or slow remote.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::pattern::glob_match;
use crate::traits::{RemoteBackend, RemoteTtl};

/// Stored value with expiration tracking
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Concurrent in-process key-value store implementing [`RemoteBackend`]
///
/// **Fault injection**:
/// - `set_available(false)` makes every call fail with [`CacheError::Unavailable`]
/// - `set_latency(d)` delays every call by `d` (to exercise client timeouts)
///
/// **Example**:
/// ```rust
/// use arcade_cache::backends::MemoryBackend;
/// use arcade_cache::RemoteBackend;
///
/// # async fn example() -> arcade_cache::error::Result<()> {
/// let backend = MemoryBackend::new();
/// backend.set("arcade:app:beat-saber", b"{}", None).await?;
/// assert!(backend.exists("arcade:app:beat-saber").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    map: DashMap<String, MemoryEntry>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing in-memory remote backend");

        Self {
            map: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Toggle simulated reachability
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "[Memory] Availability changed");
    }

    /// Delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of stored keys, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Stored keys in no particular order (expired keys excluded)
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.map
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Overwrite a raw value without going through the client, e.g. to plant a corrupt entry
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.map.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: None,
            },
        );
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }

    /// Live entry for `key`, dropping it if it has expired
    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self.map.get(key)?.value().clone();
        if entry.is_expired(now) {
            self.map.remove(key);
            None
        } else {
            Some(entry)
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.enter().await?;
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Vec<u8>, RemoteTtl)>> {
        self.enter().await?;
        let now = Instant::now();
        Ok(self.live(key).map(|entry| {
            let ttl = match entry.expires_at {
                Some(expires_at) => RemoteTtl::Expires(expires_at.saturating_duration_since(now)),
                None => RemoteTtl::Persistent,
            };
            (entry.value, ttl)
        }))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.enter().await?;
        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.map.insert(key.to_string(), entry);
        debug!(key = %key, ttl = ?ttl, "[Memory] Stored key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        let now = Instant::now();
        Ok(self
            .map
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<RemoteTtl> {
        self.enter().await?;
        let now = Instant::now();
        Ok(match self.live(key) {
            None => RemoteTtl::Missing,
            Some(MemoryEntry {
                expires_at: None, ..
            }) => RemoteTtl::Persistent,
            Some(MemoryEntry {
                expires_at: Some(expires_at),
                ..
            }) => RemoteTtl::Expires(expires_at.saturating_duration_since(now)),
        })
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.enter().await?;
        let now = Instant::now();
        let mut removed = 0u64;
        self.map.retain(|key, entry| {
            if glob_match(pattern.as_bytes(), key.as_bytes()) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        debug!(pattern = %pattern, removed, "[Memory] Removed keys matching pattern");
        Ok(removed)
    }

    async fn ping(&self) -> Result<()> {
        self.enter().await
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
