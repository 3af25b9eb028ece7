//! Metrics Collector
//!
//! Lock-free counters, gauges and histograms with Prometheus text export.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Counter metric
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by n
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Gauge metric holding an `f64`
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self::default()
    }

    /// Set value
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Histogram bucket
#[derive(Debug, Clone)]
pub struct HistogramBucket {
    /// Upper bound (inclusive)
    pub le: f64,
    /// Cumulative count of observations `<= le`
    pub count: u64,
}

/// Histogram metric
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries
    boundaries: Vec<f64>,
    /// Bucket counts
    buckets: Vec<AtomicU64>,
    /// Sum of all observations in microunits
    sum: AtomicU64,
    /// Count of observations
    count: AtomicU64,
}

impl Histogram {
    /// Create with custom buckets
    pub fn with_buckets(mut boundaries: Vec<f64>) -> Self {
        boundaries.retain(|b| b.is_finite());
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();
        let buckets: Vec<AtomicU64> = boundaries.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            boundaries,
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets for batch processing time (in seconds)
    pub fn latency() -> Self {
        Self::with_buckets(vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }

    /// Observe a value
    pub fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            if value <= boundary {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Observe duration
    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get sum
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Get buckets
    pub fn buckets(&self) -> Vec<HistogramBucket> {
        self.boundaries
            .iter()
            .zip(self.buckets.iter())
            .map(|(&le, count)| HistogramBucket {
                le,
                count: count.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Get average
    pub fn average(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum() / count as f64
    }

    fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::latency()
    }
}

#[derive(Debug)]
struct Family<T> {
    help: &'static str,
    metric: Arc<T>,
}

/// Named metric registry
#[derive(Debug)]
pub struct MetricsCollector {
    /// Prefix added to every exported name
    namespace: String,
    counters: RwLock<BTreeMap<String, Family<Counter>>>,
    gauges: RwLock<BTreeMap<String, Family<Gauge>>>,
    histograms: RwLock<BTreeMap<String, Family<Histogram>>>,
    /// Start time
    start_time: Instant,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Get or create a counter
    pub fn counter(&self, name: &str, help: &'static str) -> Arc<Counter> {
        get_or_insert(&self.counters, name, help, Counter::new)
    }

    /// Get or create a gauge
    pub fn gauge(&self, name: &str, help: &'static str) -> Arc<Gauge> {
        get_or_insert(&self.gauges, name, help, Gauge::new)
    }

    /// Get or create a latency histogram
    pub fn histogram(&self, name: &str, help: &'static str) -> Arc<Histogram> {
        get_or_insert(&self.histograms, name, help, Histogram::latency)
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get all counter values
    pub fn get_counters(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.metric.get()))
            .collect()
    }

    /// Get all gauge values
    pub fn get_gauges(&self) -> BTreeMap<String, f64> {
        self.gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.metric.get()))
            .collect()
    }

    /// Reset counters and histograms; gauges keep their last value
    pub fn reset(&self) {
        for family in self.counters.read().values() {
            family.metric.reset();
        }
        for family in self.histograms.read().values() {
            family.metric.reset();
        }
    }

    /// Export metrics as text (Prometheus format)
    pub fn export_text(&self) -> String {
        let mut output = String::new();
        let ns = &self.namespace;

        for (name, family) in self.counters.read().iter() {
            write_header(&mut output, ns, name, family.help, "counter");
            let _ = writeln!(output, "{}_{} {}", ns, name, family.metric.get());
        }

        for (name, family) in self.gauges.read().iter() {
            write_header(&mut output, ns, name, family.help, "gauge");
            let _ = writeln!(output, "{}_{} {}", ns, name, family.metric.get());
        }

        for (name, family) in self.histograms.read().iter() {
            let histogram = &family.metric;
            write_header(&mut output, ns, name, family.help, "histogram");
            for bucket in histogram.buckets() {
                let _ = writeln!(
                    output,
                    "{}_{}_bucket{{le=\"{}\"}} {}",
                    ns, name, bucket.le, bucket.count
                );
            }
            let _ = writeln!(
                output,
                "{}_{}_bucket{{le=\"+Inf\"}} {}",
                ns,
                name,
                histogram.count()
            );
            let _ = writeln!(output, "{}_{}_sum {}", ns, name, histogram.sum());
            let _ = writeln!(output, "{}_{}_count {}", ns, name, histogram.count());
        }

        output
    }
}

fn get_or_insert<T>(
    map: &RwLock<BTreeMap<String, Family<T>>>,
    name: &str,
    help: &'static str,
    make: fn() -> T,
) -> Arc<T> {
    if let Some(family) = map.read().get(name) {
        return Arc::clone(&family.metric);
    }
    let mut map = map.write();
    let family = map.entry(name.to_string()).or_insert_with(|| Family {
        help,
        metric: Arc::new(make()),
    });
    Arc::clone(&family.metric)
}

pub(crate) fn write_header(out: &mut String, ns: &str, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {}_{} {}", ns, name, help);
    let _ = writeln!(out, "# TYPE {}_{} {}", ns, name, kind);
}

// =============================================================================
// Tests
// =============================================================================
