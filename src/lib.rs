//! memtier - Performance layer for LLM-memory pipelines
//!
//! A three-tier cache (memory, managed memory, disk), a priority-aware batch
//! scheduler with per-type background workers, a synchronous priority
//! splitter, and a performance monitor with trend detection, wired together
//! by the [`OptimizationEngine`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OptimizationEngine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ TieredCache  │    │    Batch     │    │ Performance  │       │
//! │  │ L1 → L2 → L3 │───▶│  Processor   │───▶│   Monitor    │       │
//! │  │   + codecs   │    │ + Splitter   │    │  + health    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`batch`] - Priority batch processor and synchronous splitter
//! - [`cache`] - Tiered cache, codecs and cleanup scheduler
//! - [`config`] - Engine configuration and YAML loading
//! - [`engine`] - The optimization facade
//! - [`error`] - Error types
//! - [`monitoring`] - Performance monitor, Prometheus export and health
//! - [`payload`] - Cached value model

pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitoring;
pub mod payload;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::OptimizationEngine;
pub use error::{Error, Result};
pub use payload::{Payload, ValueClass};
