//! Three-Tiered Cache System
//!
//! Memoizes expensive, repeatable computations (embeddings, extracted facts,
//! compressed text, search results) across three tiers of increasing size and
//! latency.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        Tiered Cache                                       │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L1 (in-process)      │ L2 (managed)        │ L3 (directory)            │
//! │  ┌────────────────┐   │ ┌────────────────┐  │ ┌────────────────────┐    │
//! │  │ FIFO map       │   │ │ LRU/LFU/FIFO   │  │ │ One file per key   │    │
//! │  │ count bound    │   │ │ count + bytes  │  │ │ codec + LZ4        │    │
//! │  │ Default: 1000  │   │ │ TTL            │  │ │ Age reaper (7d)    │    │
//! │  └────────────────┘   │ └────────────────┘  │ └────────────────────┘    │
//! │         │             │         │           │           │               │
//! │         └─────────────┴─────────┴───────────┴───────────┘               │
//! │                              │                                           │
//! │                 Promotion on hit / write-through on put                  │
//! │                 Auto-cleanup scheduler (hourly)                          │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - One lock per tier, never held across `.await`
//! - L1 and L2 are updated synchronously on put, L3 in the background
//! - Tier failures are recovered locally and never reach cache callers

pub mod codec;
mod cleanup;
mod entry;
mod l1;
mod l2;
mod l3;
mod metrics;
mod policy;
mod tiered;

pub use cleanup::{CleanupConfig, CleanupScheduler, DEFAULT_CLEANUP_INTERVAL};
pub use codec::{Codec, CodecRegistry};
pub use entry::CacheEntry;
pub use l1::{L1Cache, L1Config, L1Stats};
pub use l2::{L2Cache, L2Config, L2Stats};
pub use l3::{L3Cache, L3Config, L3Stats};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot, TierSnapshot};
pub use policy::EvictionPolicy;
pub use tiered::{
    CacheConfig, CacheResult, CacheSizes, CacheTier, CleanupReport, TieredCache, TieredStats,
};

pub(crate) use metrics::update_latency_ema;

use std::time::Duration;

/// Default L1 capacity (entries)
pub const DEFAULT_L1_CAPACITY: usize = 1000;

/// Default L2 entry bound
pub const DEFAULT_L2_MAX_ENTRIES: usize = 10_000;

/// Default L2 byte bound (1GiB)
pub const DEFAULT_L2_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Default age after which L3 files are reaped (7 days)
pub const DEFAULT_L3_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities() {
        assert_eq!(DEFAULT_L1_CAPACITY, 1000);
        assert_eq!(DEFAULT_L2_MAX_ENTRIES, 10_000);
        // L2: 1GiB
        assert_eq!(DEFAULT_L2_MAX_BYTES, 1 << 30);
    }

    #[test]
    fn test_default_l3_age() {
        assert_eq!(DEFAULT_L3_MAX_AGE.as_secs(), 604_800);
    }
}
