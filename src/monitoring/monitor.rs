//! Performance Monitor
//!
//! Shared sink for cache, batch and resource measurements. Counters are
//! atomics; the batch history is a bounded ring behind a mutex.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::collector::{write_header, Counter, Gauge, Histogram, MetricsCollector};
use super::health::{HealthCheck, HealthResponse};
use super::resources::ResourceUsage;
use crate::cache::{CacheMetrics, CacheTier, MetricsSnapshot};
use crate::error::{Error, Result};

/// Prefix of every exported metric name
pub const METRICS_NAMESPACE: &str = "memtier";

/// Monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Batch samples kept for trend analysis
    pub max_history: usize,
    /// Samples considered by the trend classifier
    pub trend_window: usize,
    /// Run the background resource sampler
    pub sample_resources: bool,
    /// Time between resource samples
    #[serde(with = "crate::config::duration_serde")]
    pub sample_interval: Duration,
    /// Hit rate below which the cache check reports degraded
    pub min_hit_rate: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            trend_window: 100,
            sample_resources: true,
            sample_interval: Duration::from_secs(30),
            min_hit_rate: 0.5,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(Error::Config("monitor.max_history must be > 0".into()));
        }
        if self.trend_window == 0 {
            return Err(Error::Config("monitor.trend_window must be > 0".into()));
        }
        if self.sample_interval.is_zero() {
            return Err(Error::Config("monitor.sample_interval must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_hit_rate) {
            return Err(Error::Config(
                "monitor.min_hit_rate must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// One processed batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchSample {
    pub timestamp: DateTime<Utc>,
    pub batch_size: usize,
    #[serde(with = "crate::config::duration_serde")]
    pub processing_time: Duration,
}

/// Direction of batch latency over the trend window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
    InsufficientData,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Trend::Improving => "improving",
            Trend::Stable => "stable",
            Trend::Degrading => "degrading",
            Trend::InsufficientData => "insufficient_data",
        };
        f.write_str(s)
    }
}

/// Trend over the most recent batch samples
#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    /// Mean processing time over the window
    #[serde(with = "crate::config::duration_serde")]
    pub avg_processing_time: Duration,
    pub trend: Trend,
    pub samples: usize,
}

/// Batch throughput summary
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub total_processed: u64,
    pub failed_tasks: u64,
    pub batches: u64,
    /// Running mean of processing time per batch
    #[serde(with = "crate::config::duration_serde")]
    pub avg_batch_time: Duration,
    /// Processed tasks per second of handler time
    pub throughput_per_sec: f64,
}

/// Full performance snapshot
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub cache_hit_rate: f64,
    pub cache_stats: MetricsSnapshot,
    pub batch_stats: BatchStats,
    pub resource_usage: Option<ResourceUsage>,
    pub trends: TrendReport,
}

/// Relative change between quarter means that counts as a trend
const TREND_THRESHOLD: f64 = 0.10;

/// Minimum samples for a trend verdict
const MIN_TREND_SAMPLES: usize = 4;

/// Classify a series of processing times (oldest first).
///
/// Compares the mean of the first quarter with the mean of the last quarter.
pub fn classify_trend(times: &[f64]) -> Trend {
    if times.len() < MIN_TREND_SAMPLES {
        return Trend::InsufficientData;
    }
    let quarter = times.len() / 4;
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let first = mean(&times[..quarter]);
    let last = mean(&times[times.len() - quarter..]);

    if first <= 0.0 {
        return if last > 0.0 { Trend::Degrading } else { Trend::Stable };
    }
    let change = (last - first) / first;
    if change > TREND_THRESHOLD {
        Trend::Degrading
    } else if change < -TREND_THRESHOLD {
        Trend::Improving
    } else {
        Trend::Stable
    }
}

struct BatchMetrics {
    processed: Arc<Counter>,
    failed: Arc<Counter>,
    batches: Arc<Counter>,
    duration: Arc<Histogram>,
    total_time_us: AtomicU64,
}

struct ResourceGauges {
    memory_bytes: Arc<Gauge>,
    memory_percent: Arc<Gauge>,
    cpu_percent: Arc<Gauge>,
}

/// Performance monitor shared by every component
pub struct PerformanceMonitor {
    config: MonitorConfig,
    cache: CacheMetrics,
    batch: BatchMetrics,
    resource_gauges: ResourceGauges,
    history: Mutex<VecDeque<BatchSample>>,
    resources: RwLock<Option<ResourceUsage>>,
    collector: MetricsCollector,
    health: HealthCheck,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let collector = MetricsCollector::new(METRICS_NAMESPACE);
        let batch = BatchMetrics {
            processed: collector.counter("batch_tasks_processed_total", "Tasks handled successfully"),
            failed: collector.counter("batch_tasks_failed_total", "Tasks lost to handler errors"),
            batches: collector.counter("batches_total", "Batches handled successfully"),
            duration: collector.histogram("batch_duration_seconds", "Handler time per batch"),
            total_time_us: AtomicU64::new(0),
        };
        let resource_gauges = ResourceGauges {
            memory_bytes: collector.gauge("process_memory_bytes", "Resident set size"),
            memory_percent: collector.gauge("process_memory_percent", "RSS share of system memory"),
            cpu_percent: collector.gauge("process_cpu_percent", "Process CPU usage"),
        };

        Self {
            history: Mutex::new(VecDeque::with_capacity(config.max_history.min(4096))),
            config,
            cache: CacheMetrics::new(),
            batch,
            resource_gauges,
            resources: RwLock::new(None),
            collector,
            health: HealthCheck::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Cache counters fed by the tiered cache
    pub fn cache_metrics(&self) -> &CacheMetrics {
        &self.cache
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn health_check(&self) -> &HealthCheck {
        &self.health
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record a finished lookup; `tier` is the serving tier on a hit
    pub fn record_cache_access(&self, hit: bool, tier: Option<CacheTier>) {
        self.cache.record_access(hit, tier);
    }

    /// Record a miss on one tier of a lookup that went on to the next
    pub fn record_tier_miss(&self, tier: CacheTier) {
        self.cache.record_tier_miss(tier);
    }

    /// Record a successfully processed batch
    pub fn record_batch(&self, size: usize, elapsed: Duration) {
        self.batch.processed.add(size as u64);
        self.batch.batches.inc();
        self.batch.duration.observe_duration(elapsed);
        self.batch
            .total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let mut history = self.history.lock();
        if history.len() >= self.config.max_history {
            history.pop_front();
        }
        history.push_back(BatchSample {
            timestamp: Utc::now(),
            batch_size: size,
            processing_time: elapsed,
        });
    }

    /// Record tasks lost to a handler failure
    pub fn record_failed(&self, count: usize) {
        self.batch.failed.add(count as u64);
    }

    /// Store the latest resource sample
    pub fn record_resources(&self, usage: ResourceUsage) {
        self.resource_gauges.memory_bytes.set(usage.memory_bytes as f64);
        self.resource_gauges.memory_percent.set(usage.memory_percent);
        self.resource_gauges.cpu_percent.set(usage.cpu_percent);
        *self.resources.write() = Some(usage);
    }

    /// Reset cache counters (used when every tier is cleared)
    pub fn reset_cache_stats(&self) {
        self.cache.reset();
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    pub fn resource_usage(&self) -> Option<ResourceUsage> {
        self.resources.read().clone()
    }

    pub fn batch_stats(&self) -> BatchStats {
        let total_processed = self.batch.processed.get();
        let batches = self.batch.batches.get();
        let total_us = self.batch.total_time_us.load(Ordering::Relaxed);

        let avg_batch_time = if batches == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(total_us / batches)
        };
        let throughput_per_sec = if total_us == 0 {
            0.0
        } else {
            total_processed as f64 / (total_us as f64 / 1_000_000.0)
        };

        BatchStats {
            total_processed,
            failed_tasks: self.batch.failed.get(),
            batches,
            avg_batch_time,
            throughput_per_sec,
        }
    }

    /// Batch samples currently held, oldest first
    pub fn history(&self) -> Vec<BatchSample> {
        self.history.lock().iter().cloned().collect()
    }

    /// Trend over the last `window` batch samples
    pub fn get_trends(&self, window: usize) -> TrendReport {
        let times: Vec<f64> = {
            let history = self.history.lock();
            let skip = history.len().saturating_sub(window);
            history
                .iter()
                .skip(skip)
                .map(|s| s.processing_time.as_secs_f64())
                .collect()
        };

        let avg = if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        };

        TrendReport {
            avg_processing_time: Duration::from_secs_f64(avg),
            trend: classify_trend(&times),
            samples: times.len(),
        }
    }

    pub fn get_report(&self) -> PerformanceReport {
        let cache_stats = self.cache.snapshot();
        PerformanceReport {
            generated_at: Utc::now(),
            uptime_seconds: self.collector.uptime().as_secs(),
            cache_hit_rate: cache_stats.hit_rate,
            cache_stats,
            batch_stats: self.batch_stats(),
            resource_usage: self.resource_usage(),
            trends: self.get_trends(self.config.trend_window),
        }
    }

    pub fn health(&self) -> HealthResponse {
        self.health.check_all(self)
    }

    /// Prometheus text exposition
    pub fn export_text(&self) -> String {
        let mut out = self.collector.export_text();
        let ns = METRICS_NAMESPACE;
        let snap = self.cache.snapshot();

        write_header(&mut out, ns, "cache_lookups_total", "Cache lookups by outcome", "counter");
        let _ = writeln!(out, "{}_cache_lookups_total{{result=\"hit\"}} {}", ns, snap.hits);
        let _ = writeln!(out, "{}_cache_lookups_total{{result=\"miss\"}} {}", ns, snap.misses);

        write_header(&mut out, ns, "cache_hit_ratio", "Overall cache hit ratio", "gauge");
        let _ = writeln!(out, "{}_cache_hit_ratio {}", ns, snap.hit_rate);

        let tiers = [
            (CacheTier::L1, &snap.l1),
            (CacheTier::L2, &snap.l2),
            (CacheTier::L3, &snap.l3),
        ];
        write_header(&mut out, ns, "cache_tier_hits_total", "Hits per tier", "counter");
        for (tier, t) in &tiers {
            let _ = writeln!(out, "{}_cache_tier_hits_total{{tier=\"{}\"}} {}", ns, tier.label(), t.hits);
        }
        write_header(&mut out, ns, "cache_tier_misses_total", "Misses per tier", "counter");
        for (tier, t) in &tiers {
            let _ = writeln!(out, "{}_cache_tier_misses_total{{tier=\"{}\"}} {}", ns, tier.label(), t.misses);
        }
        write_header(&mut out, ns, "cache_read_latency_microseconds", "Read latency EMA per tier", "gauge");
        for (tier, t) in &tiers {
            let _ = writeln!(
                out,
                "{}_cache_read_latency_microseconds{{tier=\"{}\"}} {}",
                ns,
                tier.label(),
                t.read_latency_us
            );
        }

        write_header(&mut out, ns, "cache_promotions_total", "Promotions between tiers", "counter");
        let _ = writeln!(out, "{}_cache_promotions_total{{path=\"l3_to_l2\"}} {}", ns, snap.promotions_l3_to_l2);
        let _ = writeln!(out, "{}_cache_promotions_total{{path=\"l2_to_l1\"}} {}", ns, snap.promotions_l2_to_l1);

        out
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_cache_access_recording() {
        let monitor = PerformanceMonitor::default();
        monitor.record_cache_access(true, Some(CacheTier::L1));
        monitor.record_cache_access(true, Some(CacheTier::L2));
        monitor.record_cache_access(false, None);

        let metrics = monitor.cache_metrics();
        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L1), 1);
        assert_eq!(metrics.tier_hits(CacheTier::L2), 1);
    }

    #[test]
    fn test_batch_recording() {
        let monitor = PerformanceMonitor::default();
        monitor.record_batch(10, ms(500));
        monitor.record_batch(20, ms(700));

        let stats = monitor.batch_stats();
        assert_eq!(stats.total_processed, 30);
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.avg_batch_time, ms(600));
        assert!((stats.throughput_per_sec - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = PerformanceMonitor::new(MonitorConfig {
            max_history: 5,
            ..Default::default()
        });
        for i in 0..8 {
            monitor.record_batch(i, ms(1));
        }
        let sizes: Vec<usize> = monitor.history().iter().map(|s| s.batch_size).collect();
        assert_eq!(sizes, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_report_generation() {
        let monitor = PerformanceMonitor::default();
        monitor.record_cache_access(true, Some(CacheTier::L1));
        monitor.record_cache_access(false, None);
        monitor.record_batch(15, ms(300));

        let report = monitor.get_report();
        assert_eq!(report.cache_hit_rate, 0.5);
        assert_eq!(report.batch_stats.total_processed, 15);
        assert!(report.resource_usage.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("cache_stats").is_some());
        assert!(json.get("batch_stats").is_some());
        assert!(json.get("resource_usage").is_some());
        assert_eq!(json["trends"]["trend"], "insufficient_data");
    }

    #[test]
    fn test_degrading_trend() {
        let monitor = PerformanceMonitor::default();
        for i in 0..20 {
            monitor.record_batch(10, ms(100 + i * 10));
        }
        let trends = monitor.get_trends(100);
        assert_eq!(trends.trend, Trend::Degrading);
        assert_eq!(trends.samples, 20);
        assert!(trends.avg_processing_time > ms(100));
    }

    #[test]
    fn test_classify_trend() {
        assert_eq!(classify_trend(&[1.0, 1.0, 1.0]), Trend::InsufficientData);
        assert_eq!(classify_trend(&[2.0, 2.0, 1.0, 1.0]), Trend::Improving);
        assert_eq!(classify_trend(&[1.0, 1.0, 1.05, 1.05]), Trend::Stable);
        assert_eq!(classify_trend(&[0.0, 0.0, 0.0, 0.0]), Trend::Stable);
        assert_eq!(classify_trend(&[0.0, 0.0, 0.0, 1.0]), Trend::Degrading);
    }

    #[test]
    fn test_trend_window_uses_latest_samples() {
        let monitor = PerformanceMonitor::default();
        for _ in 0..50 {
            monitor.record_batch(1, ms(500));
        }
        for _ in 0..8 {
            monitor.record_batch(1, ms(100));
        }
        // only the fast tail is in the window
        assert_eq!(monitor.get_trends(8).trend, Trend::Stable);
        assert_eq!(monitor.get_trends(16).trend, Trend::Improving);
    }

    #[test]
    fn test_reset_cache_stats() {
        let monitor = PerformanceMonitor::default();
        monitor.record_cache_access(true, Some(CacheTier::L3));
        monitor.record_batch(1, ms(1));
        monitor.reset_cache_stats();

        assert_eq!(monitor.cache_metrics().hits(), 0);
        // batch counters are untouched
        assert_eq!(monitor.batch_stats().batches, 1);
    }

    #[test]
    fn test_export_text() {
        let monitor = PerformanceMonitor::default();
        monitor.record_cache_access(true, Some(CacheTier::L2));
        monitor.record_batch(4, ms(2));
        monitor.record_failed(3);

        let text = monitor.export_text();
        assert!(text.contains("memtier_cache_lookups_total{result=\"hit\"} 1"));
        assert!(text.contains("memtier_cache_tier_hits_total{tier=\"l2\"} 1"));
        assert!(text.contains("memtier_batch_tasks_processed_total 4"));
        assert!(text.contains("memtier_batch_tasks_failed_total 3"));
        assert!(text.contains("memtier_batch_duration_seconds_count 1"));
    }

    #[test]
    fn test_config_validation() {
        assert!(MonitorConfig::default().validate().is_ok());
        let bad = MonitorConfig {
            min_hit_rate: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
