//! Cache runtime metrics with atomic coordination
//!
//! Monotonic counters for every interesting cache event plus exponentially
//! smoothed latency averages for the read and write paths. All fields are
//! padded atomics so concurrent request threads never serialize on a metrics
//! lock. Counters only reset through an explicit operator action.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::{atomic::AtomicCell, CachePadded};
use serde::Serialize;

/// Smoothing factor denominator for latency averages: new = (old * 7 + x) / 8
const EMA_WEIGHT: u64 = 8;

/// Atomic cache metrics shared across tiers and the coherence engine
#[derive(Debug)]
pub struct CacheMetrics {
    /// Total lookup hits (either tier)
    hits: CachePadded<AtomicU64>,
    /// Hits served by the in-process tier
    l1_hits: CachePadded<AtomicU64>,
    /// Hits served by the distributed tier
    l2_hits: CachePadded<AtomicU64>,
    /// Total lookup misses
    misses: CachePadded<AtomicU64>,
    /// Completed writes
    sets: CachePadded<AtomicU64>,
    /// Keys removed by invalidation (tags, patterns, events)
    invalidations: CachePadded<AtomicU64>,
    /// Conflicts auto-resolved by the versioned strategy
    conflicts_resolved: CachePadded<AtomicU64>,
    /// Conflicts deferred for manual review
    conflicts_deferred: CachePadded<AtomicU64>,
    /// Distributed-tier call failures (timeouts included)
    l2_errors: CachePadded<AtomicU64>,
    /// Mutation events consumed by the coherence engine
    events_processed: CachePadded<AtomicU64>,
    /// Entries repopulated by the warmer
    warmed_keys: CachePadded<AtomicU64>,
    /// Smoothed read-path latency in nanoseconds
    avg_get_latency_ns: CachePadded<AtomicU64>,
    /// Smoothed write-path latency in nanoseconds
    avg_set_latency_ns: CachePadded<AtomicU64>,
    /// Derived hit rate cached for cheap snapshot reads
    hit_rate: CachePadded<AtomicCell<f64>>,
}

/// Point-in-time metrics view for reporting
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub conflicts_resolved: u64,
    pub conflicts_deferred: u64,
    pub l2_errors: u64,
    pub events_processed: u64,
    pub warmed_keys: u64,
    pub avg_get_latency_ns: u64,
    pub avg_set_latency_ns: u64,
    pub hit_rate: f64,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: CachePadded::new(AtomicU64::new(0)),
            l1_hits: CachePadded::new(AtomicU64::new(0)),
            l2_hits: CachePadded::new(AtomicU64::new(0)),
            misses: CachePadded::new(AtomicU64::new(0)),
            sets: CachePadded::new(AtomicU64::new(0)),
            invalidations: CachePadded::new(AtomicU64::new(0)),
            conflicts_resolved: CachePadded::new(AtomicU64::new(0)),
            conflicts_deferred: CachePadded::new(AtomicU64::new(0)),
            l2_errors: CachePadded::new(AtomicU64::new(0)),
            events_processed: CachePadded::new(AtomicU64::new(0)),
            warmed_keys: CachePadded::new(AtomicU64::new(0)),
            avg_get_latency_ns: CachePadded::new(AtomicU64::new(0)),
            avg_set_latency_ns: CachePadded::new(AtomicU64::new(0)),
            hit_rate: CachePadded::new(AtomicCell::new(0.0)),
        }
    }

    /// Record a hit served by the in-process tier
    pub fn record_l1_hit(&self, latency_ns: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
        self.update_get_latency(latency_ns);
        self.recalculate_hit_rate();
    }

    /// Record a hit served by the distributed tier
    pub fn record_l2_hit(&self, latency_ns: u64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
        self.update_get_latency(latency_ns);
        self.recalculate_hit_rate();
    }

    /// Record a total miss
    pub fn record_miss(&self, latency_ns: u64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.update_get_latency(latency_ns);
        self.recalculate_hit_rate();
    }

    /// Record a completed write
    pub fn record_set(&self, latency_ns: u64) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        let current = self.avg_set_latency_ns.load(Ordering::Relaxed);
        self.avg_set_latency_ns
            .store(smooth(current, latency_ns), Ordering::Relaxed);
    }

    /// Record keys removed by an invalidation pass
    pub fn record_invalidations(&self, count: u64) {
        if count > 0 {
            self.invalidations.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record a conflict auto-resolved by policy
    pub fn record_conflict_resolved(&self) {
        self.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conflict persisted for manual review
    pub fn record_conflict_deferred(&self) {
        self.conflicts_deferred.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed distributed-tier call
    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a consumed mutation event
    pub fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record entries repopulated by the warmer
    pub fn record_warmed(&self, count: u64) {
        if count > 0 {
            self.warmed_keys.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Current point-in-time view
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            conflicts_deferred: self.conflicts_deferred.load(Ordering::Relaxed),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            warmed_keys: self.warmed_keys.load(Ordering::Relaxed),
            avg_get_latency_ns: self.avg_get_latency_ns.load(Ordering::Relaxed),
            avg_set_latency_ns: self.avg_set_latency_ns.load(Ordering::Relaxed),
            hit_rate: self.hit_rate.load(),
        }
    }

    /// Operator-initiated reset; counters never reset on their own
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.l1_hits.store(0, Ordering::Relaxed);
        self.l2_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.conflicts_resolved.store(0, Ordering::Relaxed);
        self.conflicts_deferred.store(0, Ordering::Relaxed);
        self.l2_errors.store(0, Ordering::Relaxed);
        self.events_processed.store(0, Ordering::Relaxed);
        self.warmed_keys.store(0, Ordering::Relaxed);
        self.avg_get_latency_ns.store(0, Ordering::Relaxed);
        self.avg_set_latency_ns.store(0, Ordering::Relaxed);
        self.hit_rate.store(0.0);
    }

    fn update_get_latency(&self, latency_ns: u64) {
        let current = self.avg_get_latency_ns.load(Ordering::Relaxed);
        self.avg_get_latency_ns
            .store(smooth(current, latency_ns), Ordering::Relaxed);
    }

    fn recalculate_hit_rate(&self) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total > 0 {
            self.hit_rate.store(hits as f64 / total as f64);
        }
    }
}

/// Exponential moving average with a 7/8 carry
fn smooth(current: u64, sample: u64) -> u64 {
    if current == 0 {
        sample
    } else {
        (current * (EMA_WEIGHT - 1) + sample) / EMA_WEIGHT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_monotonically() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit(100);
        metrics.record_l2_hit(500);
        metrics.record_miss(900);
        metrics.record_set(200);
        metrics.record_invalidations(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.l1_hits, 1);
        assert_eq!(snap.l2_hits, 1);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.sets, 1);
        assert_eq!(snap.invalidations, 3);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn latency_average_is_smoothed() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit(800);
        // First sample seeds the average directly
        assert_eq!(metrics.snapshot().avg_get_latency_ns, 800);
        metrics.record_l1_hit(1600);
        // (800 * 7 + 1600) / 8 = 900
        assert_eq!(metrics.snapshot().avg_get_latency_ns, 900);
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = CacheMetrics::new();
        metrics.record_l1_hit(100);
        metrics.record_conflict_resolved();
        metrics.reset();

        let snap = metrics.snapshot();
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.conflicts_resolved, 0);
        assert_eq!(snap.avg_get_latency_ns, 0);
        assert_eq!(snap.hit_rate, 0.0);
    }
}
