//! Performance Monitoring
//!
//! Cache hit rates, batch throughput, process resources and health.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                       Performance Monitor                                 │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐  │
//! │  │ Cache metrics  │  │ Batch history  │  │ Resource sampler           │  │
//! │  │ (per tier)     │  │ + trends       │  │ (sysinfo)                  │  │
//! │  └────────────────┘  └────────────────┘  └────────────────────────────┘  │
//! │          │                   │                        │                  │
//! │          └───────────────────┴────────────────────────┘                  │
//! │                              │                                           │
//! │        ┌─────────────────────┴──────────────────────┐                    │
//! │        │ Metrics collector (Prometheus) │ Health    │                    │
//! │        └────────────────────────────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod collector;
mod health;
mod monitor;
mod resources;

pub use collector::{Counter, Gauge, Histogram, HistogramBucket, MetricsCollector};
pub use health::{HealthCheck, HealthCheckResult, HealthResponse, HealthStatus};
pub use monitor::{
    classify_trend, BatchSample, BatchStats, MonitorConfig, PerformanceMonitor,
    PerformanceReport, Trend, TrendReport, METRICS_NAMESPACE,
};
pub use resources::{ResourceSampler, ResourceUsage, SamplerTask};
