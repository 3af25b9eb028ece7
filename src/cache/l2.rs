//! L2 Cache - Primary Accounted Cache
//!
//! The main in-memory tier, bounded by both entry count and total payload
//! bytes, with per-entry TTL and a configurable eviction policy.
//!
//! # Design
//!
//! - One mutex around the map and two ordered indexes: eviction rank (see
//!   [`EvictionPolicy::rank`]) and expiry deadline, so picking a victim or
//!   finding expired entries never scans the map
//! - Logical clock for recency and creation order (see [`CacheEntry`])
//! - Expired entries are misses, are removed on sight, and never count as hits
//! - When nothing is left to evict the new entry is admitted anyway

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::policy::EvictionPolicy;
use super::{DEFAULT_L2_MAX_BYTES, DEFAULT_L2_MAX_ENTRIES};
use crate::payload::Payload;

/// L2 Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum total estimated payload size in bytes
    pub max_bytes: u64,
    /// Eviction policy
    pub eviction: EvictionPolicy,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_L2_MAX_ENTRIES,
            max_bytes: DEFAULT_L2_MAX_BYTES,
            eviction: EvictionPolicy::Lru,
        }
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Eviction order, lowest rank first
    order: BTreeMap<(u64, u64), String>,
    /// Deadlines; the creation stamp keeps equal instants apart
    expiries: BTreeMap<(Instant, u64), String>,
    size_bytes: u64,
    /// Logical clock
    clock: u64,
    policy: EvictionPolicy,
}

impl Inner {
    fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            expiries: BTreeMap::new(),
            size_bytes: 0,
            clock: 0,
            policy,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: String, entry: CacheEntry) {
        self.order.insert(self.policy.rank(&entry), key.clone());
        if let Some(at) = entry.expires_at() {
            self.expiries.insert((at, entry.created_seq()), key.clone());
        }
        self.size_bytes += entry.size();
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&self.policy.rank(&entry));
        if let Some(at) = entry.expires_at() {
            self.expiries.remove(&(at, entry.created_seq()));
        }
        self.size_bytes -= entry.size();
        Some(entry)
    }

    /// Record a hit and move the entry to its new rank
    fn touch(&mut self, key: &str) -> Option<&CacheEntry> {
        let seq = self.tick();
        let policy = self.policy;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&policy.rank(entry));
        entry.touch(seq);
        self.order.insert(policy.rank(entry), key.to_string());
        Some(entry)
    }

    /// Next entry to evict: the earliest expired one, else the lowest rank
    fn victim(&self, now: Instant) -> Option<String> {
        if let Some(((at, _), key)) = self.expiries.first_key_value() {
            if *at <= now {
                return Some(key.clone());
            }
        }
        self.order.first_key_value().map(|(_, key)| key.clone())
    }

    fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.expiries
            .range(..=(now, u64::MAX))
            .map(|(_, key)| key.clone())
            .collect()
    }
}

/// L2 Cache - primary accounted cache
pub struct L2Cache {
    inner: Mutex<Inner>,
    /// Configuration
    config: L2Config,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count
    evictions: AtomicU64,
    /// Entries dropped because their TTL ran out
    expirations: AtomicU64,
}

impl L2Cache {
    /// Create a new L2 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(L2Config::default())
    }

    /// Create a new L2 cache with custom configuration
    pub fn with_config(config: L2Config) -> Self {
        Self {
            inner: Mutex::new(Inner::new(config.eviction)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<Payload> {
        self.get_with_expiry(key).map(|(value, _)| value)
    }

    /// Get a value plus its absolute expiry, for promotion into L1
    pub fn get_with_expiry(&self, key: &str) -> Option<(Payload, Option<Instant>)> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            inner.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key, "L2 entry expired on read");
            return None;
        }

        let entry = inner.touch(key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some((entry.value().clone(), entry.expires_at()))
    }

    /// Insert or replace a value.
    ///
    /// Evicts by policy until both bounds hold or the cache is empty.
    /// Returns the number of entries evicted.
    pub fn put(&self, key: impl Into<String>, value: Payload, ttl: Option<Duration>) -> usize {
        let key = key.into();
        let mut inner = self.inner.lock();

        // old value never competes for space with its replacement
        inner.remove(&key);

        let seq = inner.tick();
        let entry = CacheEntry::new(value, ttl, seq);
        let needed = entry.size();

        let now = Instant::now();
        let mut evicted = 0;
        while !inner.entries.is_empty()
            && (inner.entries.len() + 1 > self.config.max_entries
                || inner.size_bytes + needed > self.config.max_bytes)
        {
            let victim = match inner.victim(now) {
                Some(victim) => victim,
                None => break,
            };
            if let Some(old) = inner.remove(&victim) {
                if old.is_expired_at(now) {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                evicted += 1;
                trace!(key = %victim, policy = %self.config.eviction, "L2 evicted entry");
            }
        }

        inner.insert(key, entry);
        evicted
    }

    /// Get a value, computing and storing it on a miss.
    ///
    /// Concurrent misses on the same key each run `compute`; the last store wins.
    pub fn get_or_compute<F>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Payload
    where
        F: FnOnce() -> Payload,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        self.put(key, value.clone(), ttl);
        value
    }

    /// Remove an entry from the cache
    pub fn remove(&self, key: &str) -> Option<Payload> {
        self.inner.lock().remove(key).map(CacheEntry::into_value)
    }

    /// Check if cache holds a live entry for a key
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired())
    }

    /// Remove every expired entry, returning how many were dropped.
    ///
    /// Candidates are collected under one short lock, then each is removed
    /// under its own lock only if it is still expired.
    pub fn purge_expired(&self) -> usize {
        let candidates = self.inner.lock().expired_keys(Instant::now());

        let mut purged = 0;
        for key in candidates {
            let mut inner = self.inner.lock();
            // the key may have been replaced since the scan
            if inner.entries.get(&key).is_some_and(|e| e.is_expired()) {
                inner.remove(&key);
                purged += 1;
            }
        }

        if purged > 0 {
            self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(count = purged, "Purged expired L2 entries");
        }
        purged
    }

    /// Clear the cache and its counters
    pub fn clear(&self) {
        *self.inner.lock() = Inner::new(self.config.eviction);

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get total estimated size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    /// Get configuration
    pub fn config(&self) -> &L2Config {
        &self.config
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
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

    /// Get cache statistics
    pub fn stats(&self) -> L2Stats {
        let (entries, size_bytes) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.size_bytes)
        };
        L2Stats {
            entries,
            size_bytes,
            hits: self.hits(),
            misses: self.misses(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
        }
    }
}

impl Default for L2Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// L2 cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct L2Stats {
    /// Number of entries
    pub entries: usize,
    /// Total estimated size in bytes
    pub size_bytes: u64,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Entries evicted by policy
    pub evictions: u64,
    /// Entries dropped on expiry
    pub expirations: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cache(max_entries: usize, eviction: EvictionPolicy) -> L2Cache {
        L2Cache::with_config(L2Config {
            max_entries,
            max_bytes: u64::MAX,
            eviction,
        })
    }

    fn text(s: &str) -> Payload {
        Payload::from(s)
    }

    #[test]
    fn test_l2_cache_creation() {
        let cache = L2Cache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
        assert_eq!(cache.config().max_entries, DEFAULT_L2_MAX_ENTRIES);
    }

    #[test]
    fn test_l2_put_get_accounting() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.put("a", text("hello"), None);
        cache.put("b", text("world!"), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes(), 11);
        assert_eq!(cache.get("a"), Some(text("hello")));

        // replacement adjusts size
        cache.put("a", text("hi"), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes(), 8);

        assert_eq!(cache.remove("b"), Some(text("world!")));
        assert_eq!(cache.size_bytes(), 2);
    }

    #[test]
    fn test_l2_lru_evicts_least_recent() {
        let cache = make_cache(3, EvictionPolicy::Lru);
        cache.put("a", text("1"), None);
        cache.put("b", text("2"), None);
        cache.put("c", text("3"), None);

        cache.put("d", text("4"), None);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c") && cache.contains("d"));
    }

    #[test]
    fn test_l2_lru_access_protects() {
        let cache = make_cache(3, EvictionPolicy::Lru);
        cache.put("a", text("1"), None);
        cache.put("b", text("2"), None);
        cache.put("c", text("3"), None);

        assert!(cache.get("a").is_some());
        cache.put("d", text("4"), None);

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_l2_lfu_evicts_least_frequent() {
        let cache = make_cache(3, EvictionPolicy::Lfu);
        cache.put("a", text("1"), None);
        cache.put("b", text("2"), None);
        cache.put("c", text("3"), None);

        cache.get("a");
        cache.get("a");
        cache.get("b");
        cache.get("c");
        cache.get("c");

        cache.put("d", text("4"), None);
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_l2_fifo_ignores_access() {
        let cache = make_cache(2, EvictionPolicy::Fifo);
        cache.put("a", text("1"), None);
        cache.put("b", text("2"), None);
        cache.get("a");

        cache.put("c", text("3"), None);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_l2_byte_bound() {
        let cache = L2Cache::with_config(L2Config {
            max_entries: 100,
            max_bytes: 10,
            eviction: EvictionPolicy::Lru,
        });

        cache.put("a", text("aaaa"), None);
        cache.put("b", text("bbbb"), None);
        cache.put("c", text("cccc"), None);

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.size_bytes() <= 10);
    }

    #[test]
    fn test_l2_oversized_entry_admitted_when_empty() {
        let cache = L2Cache::with_config(L2Config {
            max_entries: 100,
            max_bytes: 4,
            eviction: EvictionPolicy::Lru,
        });

        cache.put("small", text("ab"), None);
        cache.put("huge", text("far too large for the cache"), None);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("huge"));
    }

    #[test]
    fn test_l2_zero_ttl_always_misses() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.put("k", text("v"), Some(Duration::ZERO));

        assert!(cache.get("k").is_none());
        assert!(cache.get("k").is_none());
        assert_eq!(cache.hits(), 0);
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_l2_get_with_expiry() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.put("forever", text("v"), None);
        cache.put("soon", text("v"), Some(Duration::from_secs(60)));

        assert!(cache.get_with_expiry("forever").unwrap().1.is_none());
        let deadline = cache.get_with_expiry("soon").unwrap().1.unwrap();
        assert!(deadline > Instant::now());
    }

    #[test]
    fn test_l2_purge_expired() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.put("a", text("1"), Some(Duration::ZERO));
        cache.put("b", text("2"), Some(Duration::ZERO));
        cache.put("c", text("3"), None);

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_l2_purge_keeps_replaced_entries() {
        let cache = std::sync::Arc::new(make_cache(1000, EvictionPolicy::Lru));
        for i in 0..200 {
            cache.put(format!("k{}", i), text("old"), Some(Duration::ZERO));
        }

        let writer = {
            let cache = std::sync::Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..200 {
                    cache.put(format!("k{}", i), text("new"), None);
                }
            })
        };
        let purged = cache.purge_expired();
        writer.join().unwrap();

        assert!(purged <= 200);
        assert_eq!(cache.len(), 200);
        for i in 0..200 {
            assert_eq!(cache.get(&format!("k{}", i)), Some(text("new")));
        }
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_l2_expired_entries_evicted_first() {
        for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::Fifo] {
            let cache = make_cache(2, policy);
            cache.put("old", text("1"), None);
            cache.put("stale", text("2"), Some(Duration::ZERO));

            cache.put("new", text("3"), None);
            assert!(cache.contains("old"), "{}", policy);
            assert!(cache.contains("new"));

            let stats = cache.stats();
            assert_eq!(stats.expirations, 1);
            assert_eq!(stats.evictions, 0);
        }
    }

    #[test]
    fn test_l2_indexes_track_entries() {
        let cache = make_cache(5, EvictionPolicy::Lfu);
        for i in 0..20 {
            let ttl = (i % 3 == 0).then(|| Duration::from_secs(60));
            cache.put(format!("k{}", i % 8), text("v"), ttl);
            cache.get(&format!("k{}", (i * 7) % 8));
        }
        cache.remove("k1");
        cache.purge_expired();

        let inner = cache.inner.lock();
        assert_eq!(inner.order.len(), inner.entries.len());
        assert!(inner.expiries.len() <= inner.entries.len());
        for key in inner.order.values().chain(inner.expiries.values()) {
            assert!(inner.entries.contains_key(key));
        }
        let size: u64 = inner.entries.values().map(CacheEntry::size).sum();
        assert_eq!(inner.size_bytes, size);
    }

    #[test]
    fn test_l2_get_or_compute() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        let mut calls = 0;

        let v = cache.get_or_compute("k", None, || {
            calls += 1;
            text("computed")
        });
        assert_eq!(v, text("computed"));

        let v = cache.get_or_compute("k", None, || {
            calls += 1;
            text("again")
        });
        assert_eq!(v, text("computed"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_l2_clear() {
        let cache = make_cache(10, EvictionPolicy::Lru);
        cache.put("a", text("1"), None);
        cache.get("a");
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.size_bytes, 0);
        assert_eq!(stats.hits, 0);
    }
}
