use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free counters updated on the lookup path.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub creations: AtomicU64,
    pub creation_failures: AtomicU64,
    pub total_creation_nanos: AtomicU64,
}

impl CacheCounters {
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_creation(&self, took: Duration) {
        self.creations.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(took.as_nanos()).unwrap_or(u64::MAX);
        self.total_creation_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.creations,
            &self.creation_failures,
            &self.total_creation_nanos,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of an [`LruCache`](super::LruCache).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    /// Sum of the resident entries' estimates, in bytes.
    pub memory_estimate: u64,
    pub creations: u64,
    pub creation_failures: u64,
    pub avg_creation_ms: f64,
}

impl CacheStatistics {
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.entries as f64 / self.capacity as f64
        }
    }

    pub(crate) fn from_counters(
        counters: &CacheCounters,
        entries: usize,
        capacity: usize,
        memory_estimate: u64,
    ) -> Self {
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let creations = counters.creations.load(Ordering::Relaxed);
        let total_nanos = counters.total_creation_nanos.load(Ordering::Relaxed);
        let lookups = hits + misses;

        Self {
            entries,
            capacity,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            evictions: counters.evictions.load(Ordering::Relaxed),
            expirations: counters.expirations.load(Ordering::Relaxed),
            memory_estimate,
            creations,
            creation_failures: counters.creation_failures.load(Ordering::Relaxed),
            avg_creation_ms: if creations == 0 {
                0.0
            } else {
                total_nanos as f64 / creations as f64 / 1_000_000.0
            },
        }
    }
}
