//! Tiered Cache - Unified Three-Tier Cache
//!
//! Composes L1 → L2 → L3 with promotion on hit and write-through on put. This
//! is the only cache entry point the rest of the crate uses.
//!
//! - `get` checks L1, then L2 (promoting into L1), then L3 (promoting into L2
//!   and L1); every tier consulted is reported to the performance monitor
//! - `put` updates L1 and L2 synchronously, so a following `get` never sees a
//!   stale value, and persists to L3 in the background
//! - Tier failures never reach the caller
//!
//! Writers (`put`, `remove`, `clear`) and promotions for a key serialize on one
//! of [`WRITE_STRIPES`] striped locks. Each stripe carries a generation that
//! writers bump; an L3 read only promotes if the generation it saw before the
//! read is unchanged, so a slow promotion never overwrites a newer `put`.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::codec::CodecRegistry;
use super::entry::{deadline, remaining};
use super::l1::{L1Cache, L1Config, L1Stats};
use super::l2::{L2Cache, L2Config, L2Stats};
use super::l3::{L3Cache, L3Config, L3Stats};
use super::metrics::LatencyTracker;
use crate::error::{Error, Result};
use crate::monitoring::PerformanceMonitor;
use crate::payload::Payload;

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// L1 - in-process hot map
    L1,
    /// L2 - primary accounted cache
    L2,
    /// L3 - persistent directory
    L3,
}

impl CacheTier {
    /// All tiers, fastest first
    pub const ALL: [CacheTier; 3] = [CacheTier::L1, CacheTier::L2, CacheTier::L3];

    /// Position in [`CacheTier::ALL`]
    pub fn index(&self) -> usize {
        match self {
            CacheTier::L1 => 0,
            CacheTier::L2 => 1,
            CacheTier::L3 => 2,
        }
    }

    /// Lowercase label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
            CacheTier::L3 => "l3",
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (memory)"),
            CacheTier::L2 => write!(f, "L2 (managed)"),
            CacheTier::L3 => write!(f, "L3 (disk)"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 configuration
    pub l1: L1Config,
    /// L2 configuration
    pub l2: L2Config,
    /// L3 configuration
    pub l3: L3Config,
    /// TTL applied when `put` is given none
    #[serde(with = "crate::config::duration_serde::option")]
    pub default_ttl: Option<Duration>,
}

impl CacheConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.l1.capacity == 0 {
            return Err(Error::Config("cache.l1.capacity must be > 0".into()));
        }
        if self.l2.max_entries == 0 {
            return Err(Error::Config("cache.l2.max_entries must be > 0".into()));
        }
        if self.l2.max_bytes == 0 {
            return Err(Error::Config("cache.l2.max_bytes must be > 0".into()));
        }
        if self.l3.directory.as_os_str().is_empty() {
            return Err(Error::Config("cache.l3.directory must not be empty".into()));
        }
        Ok(())
    }
}

/// Cache lookup result
#[derive(Debug, Clone)]
pub struct CacheResult {
    /// The cached value
    pub value: Payload,
    /// Which tier served the value
    pub tier: CacheTier,
    /// Lookup latency
    pub latency: Duration,
}

/// Entry counts per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheSizes {
    pub l1_entries: usize,
    pub l2_entries: usize,
    pub l2_bytes: u64,
    pub l3_entries: usize,
}

/// Work done by one cleanup cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Entries trimmed from an oversized L1
    pub l1_trimmed: usize,
    /// Expired entries purged from L2
    pub l2_expired: usize,
    /// Stale files reaped from L3
    pub l3_reaped: usize,
}

/// Per-tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct TieredStats {
    pub l1: L1Stats,
    pub l2: L2Stats,
    pub l3: L3Stats,
}

/// Number of write stripes; a power of two so the index is a mask
pub const WRITE_STRIPES: usize = 64;

/// Striped write locks, each holding a generation bumped on every write
struct WriteStripes {
    stripes: Box<[Mutex<u64>]>,
}

impl WriteStripes {
    fn new() -> Self {
        Self {
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(0)).collect(),
        }
    }

    fn stripe_index(key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (WRITE_STRIPES - 1)
    }

    fn stripe(&self, key: &str) -> &Mutex<u64> {
        &self.stripes[Self::stripe_index(key)]
    }

    /// Lock the key's stripe and bump its generation
    fn write(&self, key: &str) -> MutexGuard<'_, u64> {
        let mut guard = self.stripe(key).lock();
        *guard += 1;
        guard
    }

    /// Lock every stripe in index order and bump each generation
    fn write_all(&self) -> Vec<MutexGuard<'_, u64>> {
        self.stripes
            .iter()
            .map(|stripe| {
                let mut guard = stripe.lock();
                *guard += 1;
                guard
            })
            .collect()
    }
}

/// Unified three-tier cache
pub struct TieredCache {
    /// L1 (memory) cache
    l1: L1Cache,
    /// L2 (managed) cache
    l2: L2Cache,
    /// L3 (disk) cache
    l3: Arc<L3Cache>,
    /// Codec registry shared with L3
    codecs: Arc<CodecRegistry>,
    /// Performance monitor receiving tier hits and misses
    monitor: Arc<PerformanceMonitor>,
    /// Configuration
    config: CacheConfig,
    /// Serializes writers and promotions per key stripe
    stripes: WriteStripes,
}

impl TieredCache {
    /// Create the three tiers; fails if the L3 directory cannot be created
    pub fn new(
        config: CacheConfig,
        codecs: Arc<CodecRegistry>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Result<Self> {
        config.validate()?;

        let l3 = L3Cache::open(config.l3.clone(), Arc::clone(&codecs))?;

        info!(
            l1_capacity = config.l1.capacity,
            l2_max_entries = config.l2.max_entries,
            l2_max_bytes = config.l2.max_bytes,
            eviction = %config.l2.eviction,
            l3_directory = %config.l3.directory.display(),
            "Tiered cache initialized"
        );

        Ok(Self {
            l1: L1Cache::with_config(config.l1.clone()),
            l2: L2Cache::with_config(config.l2.clone()),
            l3: Arc::new(l3),
            codecs,
            monitor,
            config,
            stripes: WriteStripes::new(),
        })
    }

    /// Look a key up through every tier, reporting which tier served it
    pub async fn lookup(&self, key: &str) -> Option<CacheResult> {
        let metrics = self.monitor.cache_metrics();
        let tracker = LatencyTracker::start();

        // Try L1 first
        let tier_tracker = LatencyTracker::start();
        if let Some(value) = self.l1.get(key) {
            metrics.record_read_latency(CacheTier::L1, tier_tracker.elapsed());
            self.monitor.record_cache_access(true, Some(CacheTier::L1));
            return Some(CacheResult {
                value,
                tier: CacheTier::L1,
                latency: tracker.elapsed(),
            });
        }
        self.monitor.record_tier_miss(CacheTier::L1);

        // Try L2; read and promotion share one stripe lock
        let stripe = self.stripes.stripe(key);
        let tier_tracker = LatencyTracker::start();
        let generation = {
            let guard = stripe.lock();
            if let Some((value, expires_at)) = self.l2.get_with_expiry(key) {
                metrics.record_read_latency(CacheTier::L2, tier_tracker.elapsed());
                self.l1.promote(key, value.clone(), expires_at);
                drop(guard);
                metrics.record_promotion_l2_to_l1();
                self.monitor.record_cache_access(true, Some(CacheTier::L2));
                return Some(CacheResult {
                    value,
                    tier: CacheTier::L2,
                    latency: tracker.elapsed(),
                });
            }
            *guard
        };
        self.monitor.record_tier_miss(CacheTier::L2);

        // Try L3
        let tier_tracker = LatencyTracker::start();
        let l3 = Arc::clone(&self.l3);
        let owned_key = key.to_string();
        let found = match tokio::task::spawn_blocking(move || l3.load(&owned_key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, error = %e, "L3 lookup task failed");
                None
            }
        };

        if let Some((value, ttl)) = found {
            metrics.record_read_latency(CacheTier::L3, tier_tracker.elapsed());
            let promoted = {
                let guard = stripe.lock();
                if *guard == generation {
                    self.l2.put(key, value.clone(), ttl);
                    self.l1.promote(key, value.clone(), deadline(ttl));
                    true
                } else {
                    false
                }
            };
            if promoted {
                metrics.record_promotion_l3_to_l2();
                metrics.record_promotion_l2_to_l1();
            } else {
                debug!(key, "Skipped L3 promotion, key written during the read");
            }
            self.monitor.record_cache_access(true, Some(CacheTier::L3));
            return Some(CacheResult {
                value,
                tier: CacheTier::L3,
                latency: tracker.elapsed(),
            });
        }

        self.monitor.record_cache_access(false, Some(CacheTier::L3));
        None
    }

    /// Get a value from the fastest tier holding it
    pub async fn get(&self, key: &str) -> Option<Payload> {
        self.lookup(key).await.map(|r| r.value)
    }

    /// Store a value in every tier.
    ///
    /// `ttl` falls back to the configured default. L3 is written in the background.
    pub fn put(&self, key: &str, value: Payload, ttl: Option<Duration>) {
        let ttl = ttl.or(self.config.default_ttl);

        let _stripe = self.stripes.write(key);
        self.l1.put(key, value.clone(), deadline(ttl));
        self.l2.put(key, value.clone(), ttl);
        self.l3.spawn_store(key.to_string(), value, ttl);
    }

    /// Get a value, computing and storing it on a miss.
    ///
    /// Not single-flight: concurrent misses on one key each run `compute`.
    /// Errors from `compute` are returned and nothing is stored.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> std::result::Result<Payload, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Payload, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.put(key, value.clone(), ttl);
        Ok(value)
    }

    /// Store many values, returning how many were written
    pub fn warmup<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (String, Payload)>,
    {
        let mut count = 0;
        for (key, value) in items {
            self.put(&key, value, None);
            count += 1;
        }
        debug!(count, "Cache warmup queued");
        count
    }

    /// Check L1 and L2 for a live entry
    pub fn contains(&self, key: &str) -> bool {
        self.l1.contains(key) || self.l2.contains(key)
    }

    /// Remove a key from every tier
    pub fn remove(&self, key: &str) -> bool {
        let _stripe = self.stripes.write(key);
        let l1 = self.l1.remove(key).is_some();
        let l2 = self.l2.remove(key).is_some();
        let l3 = self.l3.remove(key);
        l1 || l2 || l3
    }

    /// Wait for background L3 writes to finish
    pub async fn wait_for_persistence(&self) {
        self.l3.wait_for_persistence().await;
    }

    /// One cleanup cycle: trim an oversized L1, purge expired L2, reap L3
    pub async fn run_cleanup(&self) -> CleanupReport {
        let capacity = self.l1.capacity();
        let l1_trimmed = if self.l1.len() > 2 * capacity {
            self.l1.trim_to(capacity)
        } else {
            0
        };

        let l2_expired = self.l2.purge_expired();

        let l3 = Arc::clone(&self.l3);
        let l3_reaped = match tokio::task::spawn_blocking(move || l3.reap()).await {
            Ok(reaped) => reaped,
            Err(e) => {
                warn!(error = %e, "L3 reaper task failed");
                0
            }
        };

        CleanupReport {
            l1_trimmed,
            l2_expired,
            l3_reaped,
        }
    }

    /// Empty every tier and reset cache counters
    pub fn clear(&self) {
        let stripes = self.stripes.write_all();
        self.l1.clear();
        self.l2.clear();
        let removed = self.l3.clear();
        drop(stripes);
        self.monitor.reset_cache_stats();
        info!(l3_removed = removed, "All cache tiers cleared");
    }

    /// Entry counts per tier
    pub fn sizes(&self) -> CacheSizes {
        CacheSizes {
            l1_entries: self.l1.len(),
            l2_entries: self.l2.len(),
            l2_bytes: self.l2.size_bytes(),
            l3_entries: self.l3.len(),
        }
    }

    /// Per-tier statistics
    pub fn stats(&self) -> TieredStats {
        TieredStats {
            l1: self.l1.stats(),
            l2: self.l2.stats(),
            l3: self.l3.stats(),
        }
    }

    /// Remaining TTL of an L2 entry, mainly for diagnostics
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.l2.get_with_expiry(key).and_then(|(_, exp)| remaining(exp))
    }

    /// Get reference to L1 cache
    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }

    /// Get reference to L2 cache
    pub fn l2(&self) -> &L2Cache {
        &self.l2
    }

    /// Get reference to L3 cache
    pub fn l3(&self) -> &Arc<L3Cache> {
        &self.l3
    }

    /// Get the codec registry
    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

// =============================================================================
// Tests
// =============================================================================
