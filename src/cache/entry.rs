//! Cache Entry Types
//!
//! Entries owned by the L2 tier. Recency and creation order are tracked with a
//! logical clock supplied by the owning cache, so two entries created within the
//! same wall-clock tick still have a strict order.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::payload::Payload;

/// A cached value plus its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Stored value
    value: Payload,
    /// Estimated footprint in bytes
    size_bytes: u64,
    /// Wall-clock creation time
    created_at: Instant,
    /// Absolute expiry (None = never expires)
    expires_at: Option<Instant>,
    /// Logical creation stamp
    created_seq: u64,
    /// Logical stamp of the last hit
    last_access_seq: u64,
    /// Number of hits since creation
    access_count: u64,
}

impl CacheEntry {
    /// Create a new entry stamped with `seq`
    pub fn new(value: Payload, ttl: Option<Duration>, seq: u64) -> Self {
        let size_bytes = value.estimated_size();
        Self {
            value,
            size_bytes,
            created_at: Instant::now(),
            expires_at: deadline(ttl),
            created_seq: seq,
            last_access_seq: seq,
            access_count: 0,
        }
    }

    /// Get the stored value
    #[inline]
    pub fn value(&self) -> &Payload {
        &self.value
    }

    /// Consume the entry, returning its value
    pub fn into_value(self) -> Payload {
        self.value
    }

    /// Get estimated size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size_bytes
    }

    /// Get age since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Absolute expiry, if any
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Check if entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Time left before expiry (`Some(ZERO)` once expired)
    pub fn remaining_ttl(&self) -> Option<Duration> {
        remaining(self.expires_at)
    }

    /// Record a hit
    pub fn touch(&mut self, seq: u64) {
        self.last_access_seq = seq;
        self.access_count += 1;
    }

    /// Logical creation stamp
    #[inline]
    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }

    /// Logical stamp of the most recent hit (creation if never hit)
    #[inline]
    pub fn last_access_seq(&self) -> u64 {
        self.last_access_seq
    }

    /// Hit count
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }
}

/// Convert a TTL into an absolute deadline.
///
/// A TTL too large to represent is treated as no expiry.
pub fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| Instant::now().checked_add(ttl))
}

/// Remaining time before a deadline
pub fn remaining(expires_at: Option<Instant>) -> Option<Duration> {
    expires_at.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Unix-seconds expiry stamp for persisted entries (`0` = never).
///
/// Rounded up to whole seconds; a zero TTL stamps the current second.
pub fn unix_expiry(remaining: Option<Duration>) -> u64 {
    match remaining {
        None => 0,
        Some(left) => {
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            unix_now().saturating_add(secs).max(1)
        }
    }
}

/// Check whether a persisted stamp has passed
pub fn unix_expired(expiry: u64) -> bool {
    expiry != 0 && unix_now() >= expiry
}

/// Remaining TTL for a persisted stamp (None = never expires)
pub fn ttl_from_unix_expiry(expiry: u64) -> Option<Duration> {
    if expiry == 0 {
        return None;
    }
    let at = UNIX_EPOCH + Duration::from_secs(expiry);
    Some(at.duration_since(SystemTime::now()).unwrap_or_default())
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// =============================================================================
// Tests
// =============================================================================
