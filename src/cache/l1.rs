//! L1 Cache - In-process Hot Map
//!
//! The smallest and fastest tier: a key→value map with a hard entry bound.
//!
//! # Design
//!
//! - FIFO by insertion: when full, the single oldest-inserted entry goes
//! - Reads never move an entry; `put` and `promote` re-home it to the newest slot
//! - No TTL accounting, but an entry carrying an expiry deadline is never served
//!   after that deadline

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::DEFAULT_L1_CAPACITY;
use crate::payload::Payload;

/// L1 Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    /// Maximum number of entries
    pub capacity: usize,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_L1_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct Slot {
    value: Payload,
    expires_at: Option<Instant>,
    /// Insertion stamp, key into `Inner::order`
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<String, Slot>,
    /// Insertion order: stamp → key
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.map.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot)
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.map.remove(&key);
        Some(key)
    }
}

/// L1 Cache - in-process hot map
pub struct L1Cache {
    inner: Mutex<Inner>,
    /// Configuration
    config: L1Config,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
}

impl L1Cache {
    /// Create a new L1 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(L1Config::default())
    }

    /// Create a new L1 cache with custom configuration
    pub fn with_config(config: L1Config) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a value; hits do not change the entry's position
    pub fn get(&self, key: &str) -> Option<Payload> {
        let mut inner = self.inner.lock();

        let expired = match inner.map.get(key) {
            Some(slot) => slot
                .expires_at
                .is_some_and(|deadline| Instant::now() >= deadline),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            inner.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        inner.map.get(key).map(|slot| slot.value.clone())
    }

    /// Insert or replace a value, making it the newest entry.
    ///
    /// Returns the keys evicted to stay within capacity.
    pub fn put(&self, key: impl Into<String>, value: Payload, expires_at: Option<Instant>) -> Vec<String> {
        let key = key.into();
        let mut inner = self.inner.lock();

        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.map.insert(
            key,
            Slot {
                value,
                expires_at,
                seq,
            },
        );

        let mut evicted = Vec::new();
        while inner.map.len() > self.config.capacity {
            match inner.pop_oldest() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }
        drop(inner);

        if !evicted.is_empty() {
            self.evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            trace!(evicted = ?evicted, "L1 evicted oldest entries");
        }
        evicted
    }

    /// Upsert a value promoted from a lower tier.
    ///
    /// Same as [`L1Cache::put`]: the entry moves to the newest position.
    pub fn promote(&self, key: impl Into<String>, value: Payload, expires_at: Option<Instant>) -> Vec<String> {
        self.put(key, value, expires_at)
    }

    /// Remove an entry from the cache
    pub fn remove(&self, key: &str) -> Option<Payload> {
        self.inner.lock().remove(key).map(|slot| slot.value)
    }

    /// Check if cache holds a live entry for a key
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        match inner.map.get(key) {
            Some(slot) => !slot
                .expires_at
                .is_some_and(|deadline| Instant::now() >= deadline),
            None => false,
        }
    }

    /// Keys from oldest to newest insertion
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.values().cloned().collect()
    }

    /// Evict oldest entries until at most `target` remain.
    ///
    /// Takes the lock once per eviction so concurrent callers interleave.
    pub fn trim_to(&self, target: usize) -> usize {
        let mut evicted = 0;
        loop {
            let mut inner = self.inner.lock();
            if inner.map.len() <= target || inner.pop_oldest().is_none() {
                break;
            }
            drop(inner);
            evicted += 1;
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Clear the cache and its counters
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
        drop(inner);

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            entries: self.len(),
            capacity: self.capacity(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
        }
    }
}

impl Default for L1Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// L1 cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct L1Stats {
    /// Number of entries
    pub entries: usize,
    /// Maximum entries
    pub capacity: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Eviction count
    pub evictions: u64,
}

// =============================================================================
// Tests
// =============================================================================
