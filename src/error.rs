//! Error types for memtier
//!
//! Only setup-time mistakes and explicit encode/decode calls surface as errors.
//! Cache misses, expired entries, failed persistence and handler failures are
//! recovered where they happen and never reach cache callers.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in memtier
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown eviction policy name
    #[error("Invalid eviction policy '{0}' (expected one of: lru, lfu, fifo)")]
    InvalidEvictionPolicy(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Serialization error (config files, reports)
    #[error("Serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Batch Processor Errors
    // =========================================================================
    /// Task type was never registered
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// Task type registered twice
    #[error("Task type already registered: {0}")]
    TaskTypeExists(String),

    /// Processor has been shut down
    #[error("Batch processor is stopped")]
    ProcessorStopped,

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Encoding a payload failed
    #[error("Encoding with codec '{codec}' failed: {reason}")]
    Encode { codec: String, reason: String },

    /// Decoding stored bytes failed
    #[error("Decoding with codec '{codec}' failed: {reason}")]
    Decode { codec: String, reason: String },

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
