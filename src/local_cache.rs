//! Local Cache - Bounded In-Process Cache
//!
//! The L1 level: a size-bounded map of encoded values with per-entry TTL and a
//! configurable replacement policy. Expired entries are never returned; they
//! are removed lazily on access, during eviction, or by the periodic sweeper.
//!
//! Every operation (including `get`, which updates recency) takes the same
//! mutex for the duration of the in-memory change only.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::EvictionPolicy;
use crate::pattern::KeyPattern;
use crate::stats::{AtomicCounters, LocalCacheStats};

/// A single cached value and its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub created_at: Instant,
    pub expires_at: Option<Instant>,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn new(key: &str, value: Bytes, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            size_bytes: key.len() + value.len(),
            value,
            created_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            access_count: 0,
            last_accessed_at: now,
        }
    }

    /// Expired once `now` reaches `expires_at`
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Remaining lifetime, `None` when the entry never expires
    #[must_use]
    pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(now))
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Position in `order`; refreshed on access under LRU
    seq: u64,
}

/// Entries plus their replacement order (lowest sequence = next victim)
#[derive(Debug, Default)]
struct LocalStore {
    slots: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    total_bytes: usize,
}

impl LocalStore {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        let seq = self.next_seq();
        self.total_bytes += entry.size_bytes;
        self.order.insert(seq, key.clone());
        if let Some(old) = self.slots.insert(key, Slot { entry, seq }) {
            self.order.remove(&old.seq);
            self.total_bytes -= old.entry.size_bytes;
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.seq);
        self.total_bytes -= slot.entry.size_bytes;
        Some(slot.entry)
    }

    fn touch(&mut self, key: &str) {
        let seq = self.next_seq();
        if let Some(slot) = self.slots.get_mut(key) {
            self.order.remove(&slot.seq);
            slot.seq = seq;
            self.order.insert(seq, key.to_string());
        }
    }

    fn oldest(&self) -> Option<String> {
        self.order.first_key_value().map(|(_, key)| key.clone())
    }

    /// The expired entry closest to (or furthest past) its deadline
    fn earliest_expired(&self, now: Instant) -> Option<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .min_by_key(|(_, slot)| slot.entry.expires_at)
            .map(|(key, _)| key.clone())
    }

    fn clear(&mut self) -> usize {
        let removed = self.slots.len();
        self.slots.clear();
        self.order.clear();
        self.total_bytes = 0;
        removed
    }
}

enum Lookup {
    Missing,
    Expired,
    Live(Bytes),
}

/// Snapshot of one entry's bookkeeping, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub access_count: u64,
    pub size_bytes: usize,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
    pub expires_at: Option<Instant>,
}

/// Bounded in-process L1 cache
///
/// Values are stored already encoded so a back-fill from L2 never has to
/// re-serialise. `size()` never exceeds `max_size` once a `set` returns.
///
/// **Example**:
/// ```rust
/// use arcade_cache::{EvictionPolicy, LocalCache};
/// use bytes::Bytes;
///
/// let cache = LocalCache::new(2, EvictionPolicy::Lru);
/// cache.set("a", Bytes::from_static(b"1"), None);
/// cache.set("b", Bytes::from_static(b"2"), None);
/// cache.get("a");
/// cache.set("c", Bytes::from_static(b"3"), None);
/// assert!(cache.get("b").is_none());
/// assert!(cache.get("a").is_some());
/// ```
pub struct LocalCache {
    store: Mutex<LocalStore>,
    max_size: usize,
    policy: EvictionPolicy,
    counters: AtomicCounters,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LocalCache {
    /// Create a local cache holding at most `max_size` entries (minimum 1)
    #[must_use]
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        let max_size = max_size.max(1);
        info!(max_size, policy = %policy, "Initializing local cache");

        Self {
            store: Mutex::new(LocalStore::default()),
            max_size,
            policy,
            counters: AtomicCounters::default(),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a value; expired entries are removed and reported as misses
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut store = self.store.lock();

        let lookup = match store.slots.get_mut(key) {
            None => Lookup::Missing,
            Some(slot) if slot.entry.is_expired_at(now) => Lookup::Expired,
            Some(slot) => {
                slot.entry.access_count += 1;
                slot.entry.last_accessed_at = now;
                Lookup::Live(slot.entry.value.clone())
            }
        };

        match lookup {
            Lookup::Missing => {
                drop(store);
                self.counters.miss();
                None
            }
            Lookup::Expired => {
                store.remove(key);
                drop(store);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.miss();
                debug!(key = %key, "[L1] Expired entry removed on read");
                None
            }
            Lookup::Live(value) => {
                if self.policy == EvictionPolicy::Lru {
                    store.touch(key);
                }
                drop(store);
                self.counters.hit();
                Some(value)
            }
        }
    }

    /// Store a value, replacing any entry for the same key
    ///
    /// When the cache is full and `key` is new, one entry is evicted first
    /// according to the configured policy. Always succeeds.
    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let entry = CacheEntry::new(key, value, ttl, now);
        let mut evicted = Vec::new();

        {
            let mut store = self.store.lock();
            if !store.slots.contains_key(key) {
                while store.slots.len() >= self.max_size {
                    let Some(victim) = self.pick_victim(&store, now) else {
                        break;
                    };
                    if let Some(old) = store.remove(&victim) {
                        evicted.push((victim, old.is_expired_at(now)));
                    }
                }
            }
            store.insert(key.to_string(), entry);
        }

        for (victim, was_expired) in evicted {
            if was_expired {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            } else {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            debug!(key = %victim, policy = %self.policy, "[L1] Evicted entry");
        }
        self.counters.set();
        debug!(key = %key, ttl = ?ttl, "[L1] Cached key");
        true
    }

    fn pick_victim(&self, store: &LocalStore, now: Instant) -> Option<String> {
        match self.policy {
            EvictionPolicy::Lru | EvictionPolicy::Fifo => store.oldest(),
            EvictionPolicy::Ttl => store.earliest_expired(now).or_else(|| store.oldest()),
        }
    }

    /// Remove an entry; returns whether one was present
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.store.lock().remove(key).is_some();
        if removed {
            self.counters.delete();
        }
        removed
    }

    /// Remove every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let removed = self.store.lock().clear();
        info!(removed, "[L1] Cleared local cache");
        removed
    }

    /// Remove entries matched by the pattern's local (substring) rule
    pub fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        if pattern.is_match_all() {
            return self.clear();
        }

        let mut store = self.store.lock();
        let victims: Vec<String> = store
            .slots
            .keys()
            .filter(|key| pattern.matches_local(key))
            .cloned()
            .collect();
        for key in &victims {
            store.remove(key);
        }
        drop(store);

        let removed = victims.len();
        self.counters
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(pattern = %pattern.as_str(), literal = %pattern.literal(), removed, "[L1] Removed matching keys");
        removed
    }

    /// Eagerly drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.lock();
        let expired: Vec<String> = store
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            store.remove(key);
        }
        drop(store);

        let removed = expired.len();
        self.expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Whether a live (unexpired) entry exists, without touching recency
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.store
            .lock()
            .slots
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Bookkeeping for an entry, expired or not
    #[must_use]
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.store.lock().slots.get(key).map(|slot| EntryInfo {
            access_count: slot.entry.access_count,
            size_bytes: slot.entry.size_bytes,
            created_at: slot.entry.created_at,
            last_accessed_at: slot.entry.last_accessed_at,
            expires_at: slot.entry.expires_at,
        })
    }

    /// Remaining TTL of a live entry
    #[must_use]
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.store
            .lock()
            .slots
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now))
            .and_then(|slot| slot.entry.ttl_remaining(now))
    }

    /// Stored entry count, including expired entries not yet reclaimed
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory held by keys and values
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.store.lock().total_bytes
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// `items / max_size`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.max_size as f64
    }

    /// Count a failure that happened while producing a value for this level
    pub fn record_error(&self) {
        self.counters.error();
    }

    #[must_use]
    pub fn stats(&self) -> LocalCacheStats {
        let (items, total_bytes) = {
            let store = self.store.lock();
            (store.slots.len(), store.total_bytes)
        };
        let counters = self.counters.snapshot();

        #[allow(clippy::cast_precision_loss)]
        let utilization = items as f64 / self.max_size as f64;

        LocalCacheStats {
            hit_rate: counters.hit_rate(),
            counters,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            items,
            max_size: self.max_size,
            total_bytes,
            utilization,
            policy: self.policy,
        }
    }

    /// Round-trip a sentinel entry
    pub fn health_check(&self) -> bool {
        let check_key = "__health_check_local";
        let sentinel = Bytes::from_static(b"ok");

        self.set(check_key, sentinel.clone(), Some(Duration::from_secs(10)));
        let healthy = self.get(check_key).is_some_and(|v| v == sentinel);
        self.delete(check_key);
        healthy
    }
}

/// Spawn a task that purges expired L1 entries every `interval`
///
/// The returned handle is aborted on shutdown.
pub fn spawn_expiry_sweeper(cache: Arc<LocalCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval = ?interval, "Starting local cache expiry sweeper");
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);

        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                info!(removed, "[L1] Swept expired entries");
            } else {
                debug!("[L1] Sweep found no expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        assert!(cache.set("k1", bytes("v1"), None));
        assert_eq!(cache.get("k1"), Some(bytes("v1")));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.counters.hits, 1);
        assert_eq!(stats.counters.misses, 1);
        assert_eq!(stats.counters.sets, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = LocalCache::new(2, EvictionPolicy::Lru);
        cache.set("a", bytes("1"), None);
        cache.set("b", bytes("2"), None);
        assert!(cache.get("a").is_some());
        cache.set("c", bytes("3"), None);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(bytes("1")));
        assert_eq!(cache.get("c"), Some(bytes("3")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_fifo_ignores_access() {
        let cache = LocalCache::new(2, EvictionPolicy::Fifo);
        cache.set("a", bytes("1"), None);
        cache.set("b", bytes("2"), None);
        assert!(cache.get("a").is_some());
        cache.set("c", bytes("3"), None);

        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = LocalCache::new(2, EvictionPolicy::Lru);
        cache.set("a", bytes("1"), None);
        cache.set("b", bytes("2"), None);
        cache.set("a", bytes("10"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(bytes("10")));
        assert_eq!(cache.get("b"), Some(bytes("2")));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let cache = LocalCache::new(3, EvictionPolicy::Lru);
        for i in 0..50 {
            cache.set(&format!("key{i}"), bytes("v"), None);
            assert!(cache.len() <= 3);
        }
        assert!((cache.utilization() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        cache.set("a", bytes("1"), None);
        cache.set("b", bytes("2"), None);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_access_bookkeeping_and_size() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        cache.set("key", bytes("value"), None);
        cache.get("key");
        cache.get("key");

        let info = cache
            .entry_info("key")
            .unwrap_or_else(|| panic!("entry should exist"));
        assert_eq!(info.access_count, 2);
        assert_eq!(info.size_bytes, "key".len() + "value".len());
        assert_eq!(cache.total_bytes(), 8);
    }

    #[test]
    fn test_remove_matching_substring() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        cache.set("auth:op1:appA", bytes("1"), None);
        cache.set("auth:op1:appB", bytes("1"), None);
        cache.set("auth:op2:appA", bytes("1"), None);

        let pattern =
            KeyPattern::parse("auth:op1:*").unwrap_or_else(|e| panic!("valid pattern: {e}"));
        assert_eq!(cache.remove_matching(&pattern), 2);
        assert!(cache.contains_key("auth:op2:appA"));
        assert!(!cache.contains_key("auth:op1:appA"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_removes_entry() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        cache.set("k1", bytes("v"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k1").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_policy_prefers_expired() {
        let cache = LocalCache::new(2, EvictionPolicy::Ttl);
        cache.set("old", bytes("1"), None);
        cache.set("short", bytes("2"), Some(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(2)).await;

        cache.set("new", bytes("3"), None);
        assert!(cache.contains_key("old"));
        assert!(cache.contains_key("new"));
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_policy_falls_back_to_oldest() {
        let cache = LocalCache::new(2, EvictionPolicy::Ttl);
        cache.set("first", bytes("1"), Some(Duration::from_secs(100)));
        cache.set("second", bytes("2"), None);

        cache.set("third", bytes("3"), None);
        assert!(!cache.contains_key("first"));
        assert!(cache.contains_key("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = LocalCache::new(10, EvictionPolicy::Lru);
        cache.set("a", bytes("1"), Some(Duration::from_secs(5)));
        cache.set("b", bytes("2"), Some(Duration::from_secs(50)));
        cache.set("c", bytes("3"), None);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.ttl_remaining("b"),
            Some(Duration::from_secs(40))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let cache = Arc::new(LocalCache::new(10, EvictionPolicy::Lru));
        cache.set("a", bytes("1"), Some(Duration::from_secs(1)));
        let handle = spawn_expiry_sweeper(Arc::clone(&cache), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 0);
        handle.abort();
    }

    #[test]
    fn test_health_check() {
        let cache = LocalCache::new(1, EvictionPolicy::Lru);
        assert!(cache.health_check());
        assert!(cache.is_empty());
    }
}
