//! Cache operation counters.

use crate::sync::{AtomicU64, Ordering};

/// Monotonic operation counters, updated with relaxed atomics on the hot
/// paths and read through [`StatsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    /// Completed put attempts (including failed ones).
    pub puts: AtomicU64,
    /// Completed get attempts.
    pub gets: AtomicU64,
    /// Gets that found the key.
    pub hits: AtomicU64,
    /// Gets that missed (before any read-through population).
    pub misses: AtomicU64,
    /// Entries evicted, both policy-driven and manual.
    pub evictions: AtomicU64,
}

impl CacheStats {
    #[inline]
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of cache statistics.
///
/// Counters are read individually without a global lock, so a snapshot
/// taken during concurrent traffic is approximate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Completed put attempts.
    pub puts: u64,
    /// Completed get attempts.
    pub gets: u64,
    /// Gets that found the key.
    pub hits: u64,
    /// Gets that missed.
    pub misses: u64,
    /// Entries evicted.
    pub evictions: u64,
    /// Live entries right now.
    pub entries: u64,
    /// Pool bytes currently reserved (granularity-rounded).
    pub used_bytes: u64,
    /// Usable pool capacity in bytes.
    pub capacity_bytes: u64,
}

impl CacheStats {
    /// Capture the counters; `entries` and byte figures come from the
    /// index and allocator.
    pub fn snapshot(&self, entries: u64, used_bytes: u64, capacity_bytes: u64) -> StatsSnapshot {
        StatsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            used_bytes,
            capacity_bytes,
        }
    }
}
