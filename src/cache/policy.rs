//! Cache Eviction Policies
//!
//! Eviction order for the L2 tier. Policies rank entries by the logical clock
//! stamps carried by [`CacheEntry`], never by wall-clock time.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::entry::CacheEntry;
use crate::error::Error;

/// Eviction policy for the L2 tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EvictionPolicy {
    /// Evict the least recently accessed entry
    #[default]
    Lru,
    /// Evict the least frequently accessed entry (ties: least recent)
    Lfu,
    /// Evict the oldest entry by creation
    Fifo,
}

impl EvictionPolicy {
    /// Get policy name
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }

    /// Eviction rank of an entry; lower ranks are evicted first.
    ///
    /// Every clock stamp is unique, so no two live entries share a rank.
    pub fn rank(&self, entry: &CacheEntry) -> (u64, u64) {
        match self {
            EvictionPolicy::Lru => (entry.last_access_seq(), 0),
            EvictionPolicy::Lfu => (entry.access_count(), entry.last_access_seq()),
            EvictionPolicy::Fifo => (entry.created_seq(), 0),
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            _ => Err(Error::InvalidEvictionPolicy(s.to_string())),
        }
    }
}

impl Serialize for EvictionPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for EvictionPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
