//! Cache Metrics Collection
//!
//! Lock-free per-tier counters fed by the tiered cache through the
//! performance monitor. Overall hits and misses count one per lookup; tier
//! counters count one per tier consulted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::tiered::CacheTier;

/// Counters for a single tier
#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Read latency EMA in microseconds
    read_latency_us: AtomicU64,
}

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    tiers: [TierCounters; 3],

    // Lookup outcome (one per get)
    hits: AtomicU64,
    misses: AtomicU64,

    // Promotion tracking
    promotions_l3_to_l2: AtomicU64,
    promotions_l2_to_l1: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn tier(&self, tier: CacheTier) -> &TierCounters {
        &self.tiers[tier.index()]
    }

    /// Record the outcome of a whole lookup, and the serving tier on a hit
    pub fn record_access(&self, hit: bool, tier: Option<CacheTier>) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            if let Some(tier) = tier {
                self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(tier) = tier {
                self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a miss on one tier during a lookup that continued further down
    pub fn record_tier_miss(&self, tier: CacheTier) {
        self.tier(tier).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tier_hits(&self, tier: CacheTier) -> u64 {
        self.tier(tier).hits.load(Ordering::Relaxed)
    }

    pub fn tier_misses(&self, tier: CacheTier) -> u64 {
        self.tier(tier).misses.load(Ordering::Relaxed)
    }

    pub fn tier_hit_ratio(&self, tier: CacheTier) -> f64 {
        ratio(self.tier_hits(tier), self.tier_misses(tier))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get overall cache hit ratio
    pub fn overall_hit_ratio(&self) -> f64 {
        ratio(self.hits(), self.misses())
    }

    // Latency tracking
    pub fn record_read_latency(&self, tier: CacheTier, duration: Duration) {
        update_latency_ema(&self.tier(tier).read_latency_us, duration);
    }

    pub fn read_latency(&self, tier: CacheTier) -> Duration {
        Duration::from_micros(self.tier(tier).read_latency_us.load(Ordering::Relaxed))
    }

    // Promotion tracking
    pub fn record_promotion_l3_to_l2(&self) {
        self.promotions_l3_to_l2.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion_l2_to_l1(&self) {
        self.promotions_l2_to_l1.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tier = |t: CacheTier| TierSnapshot {
            hits: self.tier_hits(t),
            misses: self.tier_misses(t),
            hit_ratio: self.tier_hit_ratio(t),
            read_latency_us: self.read_latency(t).as_micros() as u64,
        };

        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.overall_hit_ratio(),
            l1: tier(CacheTier::L1),
            l2: tier(CacheTier::L2),
            l3: tier(CacheTier::L3),
            promotions_l3_to_l2: self.promotions_l3_to_l2.load(Ordering::Relaxed),
            promotions_l2_to_l1: self.promotions_l2_to_l1.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for t in &self.tiers {
            t.hits.store(0, Ordering::Relaxed);
            t.misses.store(0, Ordering::Relaxed);
            t.read_latency_us.store(0, Ordering::Relaxed);
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.promotions_l3_to_l2.store(0, Ordering::Relaxed);
        self.promotions_l2_to_l1.store(0, Ordering::Relaxed);
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Exponential moving average (alpha = 0.1) over an atomic microsecond value
pub(crate) fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;
    let alpha = 0.1;

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Per-tier part of a [`MetricsSnapshot`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub read_latency_us: u64,
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub l1: TierSnapshot,
    pub l2: TierSnapshot,
    pub l3: TierSnapshot,
    pub promotions_l3_to_l2: u64,
    pub promotions_l2_to_l1: u64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.tier_hits(CacheTier::L1), 0);
        assert_eq!(metrics.overall_hit_ratio(), 0.0);
    }

    #[test]
    fn test_access_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_access(true, Some(CacheTier::L1));
        metrics.record_access(true, Some(CacheTier::L2));
        metrics.record_access(false, None);

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L1), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L2), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L3), 0);
        assert!((metrics.overall_hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_tier_miss_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_tier_miss(CacheTier::L1);
        metrics.record_access(true, Some(CacheTier::L2));

        assert_eq!(metrics.tier_misses(CacheTier::L1), 1);
        assert_eq!(metrics.tier_hit_ratio(CacheTier::L1), 0.0);
        assert_eq!(metrics.tier_hit_ratio(CacheTier::L2), 1.0);
        // the lookup itself was a hit
        assert_eq!(metrics.misses(), 0);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_read_latency(CacheTier::L1, Duration::from_micros(100));
        assert_eq!(metrics.read_latency(CacheTier::L1), Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_read_latency(CacheTier::L1, Duration::from_micros(200));
        let latency = metrics.read_latency(CacheTier::L1).as_micros();
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = CacheMetrics::new();

        metrics.record_access(true, Some(CacheTier::L3));
        metrics.record_promotion_l3_to_l2();
        metrics.record_promotion_l2_to_l1();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l3.hits, 1);
        assert_eq!(snapshot.promotions_l3_to_l2, 1);
        assert_eq!(snapshot.promotions_l2_to_l1, 1);
        assert_eq!(snapshot.hit_rate, 1.0);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.l3.hits, 0);
        assert_eq!(snapshot.promotions_l3_to_l2, 0);
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
