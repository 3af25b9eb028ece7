//! L3 Cache - Persistent Directory Tier
//!
//! One file per key under a single directory, surviving restarts. Best-effort:
//! every failure is a miss or a logged write failure, never an error to the
//! caller of the tiered cache.
//!
//! # File layout
//!
//! ```text
//! <hex(sha256(key))>.entry
//! ┌───────┬───────┬──────────┬──────────────────┬──────────────┐
//! │ MTC1  │ class │ codec id │ expiry (u64 LE)  │ codec bytes  │
//! │ 4 B   │ 1 B   │ 1 B      │ unix s, 0 = none │ ...          │
//! └───────┴───────┴──────────┴──────────────────┴──────────────┘
//! ```
//!
//! Writes go to a unique `.tmp` file that is renamed into place, so readers see
//! either the previous file or the complete new one. Files that fail to parse
//! or have expired are deleted when read. The reaper is the only size control:
//! it deletes files older than `max_age`.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::codec::CodecRegistry;
use super::entry::{ttl_from_unix_expiry, unix_expired, unix_expiry};
use super::DEFAULT_L3_MAX_AGE;
use crate::error::{Error, Result};
use crate::payload::{Payload, ValueClass};

/// Magic prefix of every entry file
pub const ENTRY_MAGIC: &[u8; 4] = b"MTC1";

/// Extension of committed entries
pub const ENTRY_EXTENSION: &str = "entry";

/// Extension of in-flight writes
pub const TMP_EXTENSION: &str = "tmp";

const HEADER_LEN: usize = 4 + 1 + 1 + 8;

/// L3 Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct L3Config {
    /// Directory holding entry files
    pub directory: PathBuf,
    /// Files older than this are reaped
    #[serde(with = "crate::config::duration_serde")]
    pub max_age: Duration,
}

impl Default for L3Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache"),
            max_age: DEFAULT_L3_MAX_AGE,
        }
    }
}

/// L3 Cache - persistent directory tier
pub struct L3Cache {
    /// Configuration
    config: L3Config,
    /// Codecs used to encode and decode values
    codecs: Arc<CodecRegistry>,
    /// Bumped by `clear`; writes issued under an older epoch are dropped
    epoch: AtomicU64,
    /// Serializes the epoch check + rename against `clear`
    commit: Mutex<()>,
    /// Unique suffix for temp files
    tmp_seq: AtomicU64,
    /// Newest background write issued per key; older ones are not committed
    latest: Mutex<HashMap<String, u64>>,
    write_seq: AtomicU64,
    /// Writes spawned but not yet finished
    pending: AtomicUsize,
    /// Signalled when `pending` drops to zero
    idle: Notify,

    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    corrupt: AtomicU64,
    reaped: AtomicU64,
}

impl L3Cache {
    /// Open (creating if needed) the cache directory
    pub fn open(config: L3Config, codecs: Arc<CodecRegistry>) -> Result<Self> {
        fs::create_dir_all(&config.directory).map_err(|e| {
            Error::Config(format!(
                "cannot create L3 directory {}: {}",
                config.directory.display(),
                e
            ))
        })?;

        debug!(directory = %config.directory.display(), "L3 cache opened");

        Ok(Self {
            config,
            codecs,
            epoch: AtomicU64::new(0),
            commit: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
            latest: Mutex::new(HashMap::new()),
            write_seq: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
        })
    }

    /// Cache directory
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Path of the entry file for a key
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.config
            .directory
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a key; returns the value and its remaining TTL.
    ///
    /// Corrupt and expired files are deleted and reported as misses.
    pub fn load(&self, key: &str) -> Option<(Payload, Option<Duration>)> {
        let path = self.entry_path(key);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key, error = %e, "L3 read failed");
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match self.decode_record(&data) {
            Ok(Some(found)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(found)
            }
            Ok(None) => {
                trace!(key, "L3 entry expired");
                remove_quietly(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "Deleting corrupt L3 entry");
                self.corrupt.fetch_add(1, Ordering::Relaxed);
                remove_quietly(&path);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Parse an entry file; `Ok(None)` if it has expired
    fn decode_record(&self, data: &[u8]) -> Result<Option<(Payload, Option<Duration>)>> {
        let corrupt = |reason: &str| Error::Decode {
            codec: "l3".into(),
            reason: reason.to_string(),
        };

        if data.len() < HEADER_LEN {
            return Err(corrupt("truncated header"));
        }
        if &data[..4] != ENTRY_MAGIC {
            return Err(corrupt("bad magic"));
        }

        let class = ValueClass::from_tag(data[4]).ok_or_else(|| corrupt("unknown class tag"))?;
        let codec_id = data[5];
        let mut expiry = [0u8; 8];
        expiry.copy_from_slice(&data[6..HEADER_LEN]);
        let expiry = u64::from_le_bytes(expiry);

        if unix_expired(expiry) {
            return Ok(None);
        }

        let value = self.codecs.decode(codec_id, &data[HEADER_LEN..])?;
        if value.class() != class {
            return Err(corrupt("class tag does not match codec"));
        }
        Ok(Some((value, ttl_from_unix_expiry(expiry))))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Current clear epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Write a key synchronously; older background writes of the key are dropped
    pub fn store(&self, key: &str, value: &Payload, ttl: Option<Duration>) -> Result<()> {
        let supersede = || {
            self.latest.lock().remove(key);
            true
        };
        self.write_entry(self.epoch(), key, value, ttl, supersede)
            .map(|_| ())
    }

    /// Write a key if no `clear` happened since `epoch` was read.
    ///
    /// Returns `Ok(false)` when the write was dropped.
    pub fn store_at_epoch(
        &self,
        epoch: u64,
        key: &str,
        value: &Payload,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.write_entry(epoch, key, value, ttl, || true)
    }

    fn write_entry(
        &self,
        epoch: u64,
        key: &str,
        value: &Payload,
        ttl: Option<Duration>,
        is_current: impl FnOnce() -> bool,
    ) -> Result<bool> {
        let (codec_id, body) = self.codecs.encode(value)?;

        let mut record = Vec::with_capacity(HEADER_LEN + body.len());
        record.extend_from_slice(ENTRY_MAGIC);
        record.push(value.class().tag());
        record.push(codec_id);
        record.extend_from_slice(&unix_expiry(ttl).to_le_bytes());
        record.extend_from_slice(&body);

        let path = self.entry_path(key);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{}", seq, TMP_EXTENSION));

        if let Err(e) = write_file(&tmp, &record) {
            remove_quietly(&tmp);
            return Err(e.into());
        }

        let _guard = self.commit.lock();
        if self.epoch() != epoch || !is_current() {
            remove_quietly(&tmp);
            return Ok(false);
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            remove_quietly(&tmp);
            return Err(e.into());
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Persist a key in the background.
    ///
    /// Runs on the blocking pool when inside a tokio runtime, inline otherwise.
    /// Failures are logged and counted, never returned.
    pub fn spawn_store(self: &Arc<Self>, key: String, value: Payload, ttl: Option<Duration>) {
        let epoch = self.epoch();
        self.pending.fetch_add(1, Ordering::AcqRel);
        let seq = {
            let mut latest = self.latest.lock();
            let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
            latest.insert(key.clone(), seq);
            seq
        };

        let this = Arc::clone(self);
        let job = move || {
            let is_current = || this.latest.lock().get(&key) == Some(&seq);
            match this.write_entry(epoch, &key, &value, ttl, is_current) {
                Ok(true) => trace!(key = %key, "L3 write committed"),
                Ok(false) => debug!(key = %key, "Dropped superseded L3 write"),
                Err(e) => {
                    this.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "L3 write failed");
                }
            }
            {
                let mut latest = this.latest.lock();
                if latest.get(&key) == Some(&seq) {
                    latest.remove(&key);
                }
            }
            this.finish_write();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    fn finish_write(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Number of background writes still running
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every background write has finished
    pub async fn wait_for_persistence(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending_writes() == 0 {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete the entry for a key.
    ///
    /// Background writes issued before the call are dropped, so the key stays
    /// gone once they finish.
    pub fn remove(&self, key: &str) -> bool {
        let _guard = self.commit.lock();
        self.latest.lock().remove(key);
        fs::remove_file(self.entry_path(key)).is_ok()
    }

    /// Check if a file exists for a key (it may still be expired)
    pub fn contains(&self, key: &str) -> bool {
        self.entry_path(key).is_file()
    }

    /// Delete files older than the configured `max_age`
    pub fn reap(&self) -> usize {
        self.reap_older_than(self.config.max_age)
    }

    /// Delete entry and temp files whose mtime is older than `max_age`
    pub fn reap_older_than(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.files(&[ENTRY_EXTENSION, TMP_EXTENSION]) {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            self.reaped.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, max_age_secs = max_age.as_secs(), "Reaped stale L3 files");
        }
        removed
    }

    /// Delete every entry; in-flight writes from before the call are dropped
    pub fn clear(&self) -> usize {
        {
            let _guard = self.commit.lock();
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }

        let mut removed = 0;
        for path in self.files(&[ENTRY_EXTENSION]) {
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        removed
    }

    /// Number of committed entry files
    pub fn len(&self) -> usize {
        self.files(&[ENTRY_EXTENSION]).len()
    }

    /// Check if the directory holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn files(&self, extensions: &[&str]) -> Vec<PathBuf> {
        let dir = match fs::read_dir(&self.config.directory) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(directory = %self.config.directory.display(), error = %e, "Cannot list L3 directory");
                return Vec::new();
            }
        };

        dir.filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| extensions.contains(&ext))
            })
            .collect()
    }

    /// Get cache statistics
    pub fn stats(&self) -> L3Stats {
        L3Stats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            pending_writes: self.pending_writes(),
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove L3 file");
        }
    }
}

/// L3 cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct L3Stats {
    /// Committed entry files
    pub entries: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count
    pub misses: u64,
    /// Committed writes
    pub writes: u64,
    /// Failed writes
    pub write_failures: u64,
    /// Corrupt files deleted on read
    pub corrupt_entries: u64,
    /// Files removed by the reaper
    pub reaped: u64,
    /// Background writes in flight
    pub pending_writes: usize,
}

// =============================================================================
// Tests
// =============================================================================
