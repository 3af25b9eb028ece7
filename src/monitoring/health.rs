//! Health Checks
//!
//! Health verdict derived from the performance monitor, served by the
//! daemon's `/healthz` endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::monitor::{PerformanceMonitor, Trend};

/// Lookups needed before the hit rate is judged
pub const MIN_LOOKUPS_FOR_HIT_RATE: u64 = 100;

/// Failed-task share above which batching is degraded
pub const DEGRADED_FAILURE_RATIO: f64 = 0.10;

/// Failed-task share above which batching is unhealthy
pub const UNHEALTHY_FAILURE_RATIO: f64 = 0.50;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but operational
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Check name
    pub name: String,
    /// Status
    pub status: HealthStatus,
    /// Message
    pub message: Option<String>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Create a degraded result
    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    /// Create an unhealthy result
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    /// Individual check results
    pub checks: Vec<HealthCheckResult>,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

impl HealthResponse {
    /// Create a new health response
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Readiness flag plus the monitor-derived checks
pub struct HealthCheck {
    /// Start time
    start_time: Instant,
    /// Readiness flag
    ready: AtomicBool,
}

impl HealthCheck {
    /// Create a new health check manager
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(false),
        }
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Check readiness
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Set readiness
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Get readiness response
    pub fn readiness_check(&self) -> HealthCheckResult {
        if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "Engine not running")
        }
    }

    /// Run all health checks
    pub fn check_all(&self, monitor: &PerformanceMonitor) -> HealthResponse {
        let checks = vec![
            self.readiness_check(),
            cache_hit_rate_check(monitor),
            batch_failure_check(monitor),
            batch_latency_check(monitor),
        ];
        HealthResponse::new(checks, self.uptime())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_hit_rate_check(monitor: &PerformanceMonitor) -> HealthCheckResult {
    let metrics = monitor.cache_metrics();
    let lookups = metrics.hits() + metrics.misses();
    let rate = metrics.overall_hit_ratio();
    let min = monitor.config().min_hit_rate;

    if lookups >= MIN_LOOKUPS_FOR_HIT_RATE && rate < min {
        HealthCheckResult::degraded(
            "cache_hit_rate",
            format!("hit rate {:.2} below {:.2} over {} lookups", rate, min, lookups),
        )
    } else {
        HealthCheckResult::healthy("cache_hit_rate")
    }
}

fn batch_failure_check(monitor: &PerformanceMonitor) -> HealthCheckResult {
    let stats = monitor.batch_stats();
    let total = stats.total_processed + stats.failed_tasks;
    if total == 0 {
        return HealthCheckResult::healthy("batch_failures");
    }

    let ratio = stats.failed_tasks as f64 / total as f64;
    let message = format!("{} of {} tasks failed", stats.failed_tasks, total);
    if ratio > UNHEALTHY_FAILURE_RATIO {
        HealthCheckResult::unhealthy("batch_failures", message)
    } else if ratio > DEGRADED_FAILURE_RATIO {
        HealthCheckResult::degraded("batch_failures", message)
    } else {
        HealthCheckResult::healthy("batch_failures")
    }
}

fn batch_latency_check(monitor: &PerformanceMonitor) -> HealthCheckResult {
    let trends = monitor.get_trends(monitor.config().trend_window);
    if trends.trend == Trend::Degrading {
        HealthCheckResult::degraded(
            "batch_latency_trend",
            format!("batch latency degrading (avg {:?})", trends.avg_processing_time),
        )
    } else {
        HealthCheckResult::healthy("batch_latency_trend")
    }
}

// =============================================================================
// Tests
// =============================================================================
