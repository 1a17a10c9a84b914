//! Cache Statistics
//!
//! Lock-free counters kept by each level and by the orchestrator, plus the
//! serialisable snapshots handed to health/metrics tooling. Counters only
//! reset when the process restarts (or through `reset` in tests).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe hit/miss/set/delete/error counters
#[derive(Debug, Default)]
pub struct AtomicCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub errors: AtomicU64,
}

impl AtomicCounters {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`AtomicCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    /// `hits / (hits + misses)`, 0.0 before the first lookup
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Local (L1) cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct LocalCacheStats {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub items: usize,
    pub max_size: usize,
    pub total_bytes: usize,
    pub utilization: f64,
    pub policy: crate::config::EvictionPolicy,
}

/// Remote (L2) cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct RemoteCacheStats {
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    pub hit_rate: f64,
    pub connected: bool,
    pub backend: &'static str,
    pub namespace: String,
}

/// Orchestrator-level statistics
///
/// `hits` counts L1 and L2 hits together. A lookup is one request regardless
/// of how many levels it touched.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub total_requests: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub l1_hit_rate: f64,
    pub backfills: u64,
    pub sets: u64,
    pub deletes: u64,
    pub pattern_invalidations: u64,
    pub errors: u64,
    pub in_flight_requests: usize,
}

/// Everything the operational health surface reports
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub global: OrchestratorStats,
    pub local: LocalCacheStats,
    pub remote: RemoteCacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_no_requests() {
        assert!(CounterSnapshot::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = AtomicCounters::default();
        counters.hit();
        counters.hit();
        counters.hit();
        counters.miss();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.hits, 3);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let counters = AtomicCounters::default();
        counters.set();
        counters.delete();
        counters.error();
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }
}
