//! Value Codecs
//!
//! Encode/decode transforms selected by [`ValueClass`], applied before a value
//! is persisted to L3 and after it is read back.
//!
//! Every codec carries a one-byte id written next to the data, so entries
//! written before [`CodecRegistry::optimize_for`] swapped a class to its
//! compressed codec still decode afterwards.
//!
//! # Example
//!
//! ```
//! use memtier::cache::codec::CodecRegistry;
//! use memtier::{Payload, ValueClass};
//!
//! let registry = CodecRegistry::new();
//! registry.optimize_for(ValueClass::Text);
//!
//! let value = Payload::from("compress me ".repeat(64));
//! let (id, bytes) = registry.encode(&value).unwrap();
//! assert_eq!(registry.decode(id, &bytes).unwrap(), value);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::payload::{Payload, ValueClass};

// =============================================================================
// Codec Trait
// =============================================================================

/// Trait for value codecs
pub trait Codec: Send + Sync {
    /// Stable id written into persisted entries
    fn id(&self) -> u8;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// Class this codec handles
    fn class(&self) -> ValueClass;

    /// Encode a payload
    fn encode(&self, value: &Payload) -> Result<Bytes>;

    /// Decode bytes produced by [`Codec::encode`]
    fn decode(&self, data: &[u8]) -> Result<Payload>;
}

fn class_mismatch(codec: &dyn Codec, value: &Payload) -> Error {
    Error::Encode {
        codec: codec.name().to_string(),
        reason: format!("expected {} payload, got {}", codec.class(), value.class()),
    }
}

// =============================================================================
// Plain Codecs
// =============================================================================

/// Identity codec for raw bytes
pub struct RawCodec;

impl Codec for RawCodec {
    fn id(&self) -> u8 {
        0x00
    }

    fn name(&self) -> &'static str {
        "raw"
    }

    fn class(&self) -> ValueClass {
        ValueClass::Raw
    }

    fn encode(&self, value: &Payload) -> Result<Bytes> {
        match value {
            Payload::Raw(bytes) => Ok(bytes.clone()),
            other => Err(class_mismatch(self, other)),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        Ok(Payload::Raw(Bytes::copy_from_slice(data)))
    }
}

/// UTF-8 text codec
pub struct TextCodec;

impl Codec for TextCodec {
    fn id(&self) -> u8 {
        0x01
    }

    fn name(&self) -> &'static str {
        "text"
    }

    fn class(&self) -> ValueClass {
        ValueClass::Text
    }

    fn encode(&self, value: &Payload) -> Result<Bytes> {
        match value {
            Payload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            other => Err(class_mismatch(self, other)),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        let text = std::str::from_utf8(data).map_err(|e| Error::Decode {
            codec: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Payload::Text(text.to_string()))
    }
}

/// Embedding codec: u32 LE element count, then LE f32 values
pub struct EmbeddingCodec;

impl Codec for EmbeddingCodec {
    fn id(&self) -> u8 {
        0x02
    }

    fn name(&self) -> &'static str {
        "embedding"
    }

    fn class(&self) -> ValueClass {
        ValueClass::Embedding
    }

    fn encode(&self, value: &Payload) -> Result<Bytes> {
        let floats = match value {
            Payload::Embedding(v) => v,
            other => return Err(class_mismatch(self, other)),
        };
        let len = u32::try_from(floats.len()).map_err(|_| Error::Encode {
            codec: self.name().to_string(),
            reason: format!("embedding too long: {} elements", floats.len()),
        })?;

        let mut buf = BytesMut::with_capacity(4 + floats.len() * 4);
        buf.put_u32_le(len);
        for f in floats {
            buf.put_f32_le(*f);
        }
        Ok(buf.freeze())
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        let decode_err = |reason: String| Error::Decode {
            codec: self.name().to_string(),
            reason,
        };

        if data.len() < 4 {
            return Err(decode_err(format!("header truncated ({} bytes)", data.len())));
        }
        let (header, body) = data.split_at(4);
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if body.len() != len * 4 {
            return Err(decode_err(format!(
                "expected {} floats ({} bytes), found {} bytes",
                len,
                len * 4,
                body.len()
            )));
        }

        let floats = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Payload::Embedding(floats))
    }
}

/// JSON codec for structured values
pub struct StructuredCodec;

impl Codec for StructuredCodec {
    fn id(&self) -> u8 {
        0x03
    }

    fn name(&self) -> &'static str {
        "structured"
    }

    fn class(&self) -> ValueClass {
        ValueClass::Structured
    }

    fn encode(&self, value: &Payload) -> Result<Bytes> {
        match value {
            Payload::Structured(v) => serde_json::to_vec(v).map(Bytes::from).map_err(|e| {
                Error::Encode {
                    codec: self.name().to_string(),
                    reason: e.to_string(),
                }
            }),
            other => Err(class_mismatch(self, other)),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        serde_json::from_slice(data)
            .map(Payload::Structured)
            .map_err(|e| Error::Decode {
                codec: self.name().to_string(),
                reason: e.to_string(),
            })
    }
}

// =============================================================================
// LZ4 Codec
// =============================================================================

/// Largest decoded size an LZ4 entry may declare in its size prefix
pub const MAX_DECOMPRESSED_SIZE: usize = 256 * 1024 * 1024;

/// LZ4 block compression layered over a plain codec.
///
/// Blocks carry a 4-byte little-endian decoded-size prefix.
pub struct Lz4Codec {
    inner: Arc<dyn Codec>,
    id: u8,
    name: &'static str,
    level: i32,
}

impl Lz4Codec {
    /// Wrap a plain codec; the compressed id is the plain id with the high nibble set
    pub fn wrap(inner: Arc<dyn Codec>, name: &'static str) -> Self {
        let id = inner.id() | 0x10;
        Self {
            inner,
            id,
            name,
            level: 4,
        }
    }

    /// Override the compression level
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

impl Codec for Lz4Codec {
    fn id(&self) -> u8 {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn class(&self) -> ValueClass {
        self.inner.class()
    }

    fn encode(&self, value: &Payload) -> Result<Bytes> {
        let plain = self.inner.encode(value)?;
        if plain.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::CompressionFailed {
                algorithm: "LZ4".into(),
                reason: format!("{} bytes exceeds the decode limit", plain.len()),
            });
        }
        lz4::block::compress(
            &plain,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map(Bytes::from)
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        let failed = |reason: String| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason,
        };

        if data.len() < 4 {
            return Err(failed("missing size prefix".into()));
        }
        let (prefix, block) = data.split_at(4);
        let declared = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let size = usize::try_from(declared)
            .ok()
            .filter(|size| *size <= MAX_DECOMPRESSED_SIZE)
            .ok_or_else(|| failed(format!("declared size {} out of range", declared)))?;

        let plain = lz4::block::decompress(block, Some(size as i32))
            .map_err(|e| failed(e.to_string()))?;
        self.inner.decode(&plain)
    }
}

// =============================================================================
// Codec Registry
// =============================================================================

#[derive(Clone)]
struct Snapshot {
    /// Codec used for new writes, per class
    active: HashMap<ValueClass, Arc<dyn Codec>>,
    /// Every codec ever installed, for decoding
    by_id: HashMap<u8, Arc<dyn Codec>>,
}

/// Maps value classes to codecs
///
/// Readers clone an `Arc` of the current snapshot, so encode/decode never runs
/// under the lock. Changes swap in a new snapshot.
pub struct CodecRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl CodecRegistry {
    /// Registry with the plain codec for every class
    pub fn new() -> Self {
        let plain: [Arc<dyn Codec>; 4] = [
            Arc::new(RawCodec),
            Arc::new(TextCodec),
            Arc::new(EmbeddingCodec),
            Arc::new(StructuredCodec),
        ];

        let mut snapshot = Snapshot {
            active: HashMap::new(),
            by_id: HashMap::new(),
        };
        for codec in plain {
            snapshot.by_id.insert(codec.id(), Arc::clone(&codec));
            snapshot.active.insert(codec.class(), codec);
        }
        // compressed variants are always decodable
        for codec in Self::optimized_codecs(&snapshot) {
            snapshot.by_id.insert(codec.id(), codec);
        }

        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn optimized_codecs(snapshot: &Snapshot) -> Vec<Arc<dyn Codec>> {
        let plain = |class| snapshot.active.get(&class).cloned();
        let mut out: Vec<Arc<dyn Codec>> = Vec::new();
        if let Some(text) = plain(ValueClass::Text) {
            out.push(Arc::new(Lz4Codec::wrap(text, "lz4-text")));
        }
        if let Some(emb) = plain(ValueClass::Embedding) {
            out.push(Arc::new(Lz4Codec::wrap(emb, "lz4-embedding")));
        }
        if let Some(json) = plain(ValueClass::Structured) {
            out.push(Arc::new(Lz4Codec::wrap(json, "lz4-structured")));
        }
        out
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read())
    }

    /// Install a codec for its class; later writes of that class use it
    pub fn register(&self, codec: Arc<dyn Codec>) {
        let mut guard = self.snapshot.write();
        let mut next = Snapshot::clone(&**guard);
        next.by_id.insert(codec.id(), Arc::clone(&codec));
        next.active.insert(codec.class(), codec);
        *guard = Arc::new(next);
    }

    /// Switch a class to its compressed codec.
    ///
    /// Raw payloads have no optimized form and keep the identity codec.
    pub fn optimize_for(&self, class: ValueClass) {
        let optimized_id = match class {
            ValueClass::Raw => {
                info!("Raw values keep the identity codec");
                return;
            }
            ValueClass::Text => 0x11,
            ValueClass::Embedding => 0x12,
            ValueClass::Structured => 0x13,
        };

        let codec = self.current().by_id.get(&optimized_id).cloned();
        if let Some(codec) = codec {
            info!(class = %class, codec = codec.name(), "Optimized codec installed");
            self.register(codec);
        }
    }

    /// Active codec for a class
    pub fn codec_for(&self, class: ValueClass) -> Option<Arc<dyn Codec>> {
        self.current().active.get(&class).cloned()
    }

    /// Codec by persisted id
    pub fn by_id(&self, id: u8) -> Option<Arc<dyn Codec>> {
        self.current().by_id.get(&id).cloned()
    }

    /// Encode with the active codec for the payload's class
    pub fn encode(&self, value: &Payload) -> Result<(u8, Bytes)> {
        let codec = self.codec_for(value.class()).ok_or_else(|| Error::Encode {
            codec: value.class().to_string(),
            reason: "no codec registered".into(),
        })?;
        Ok((codec.id(), codec.encode(value)?))
    }

    /// Decode with the codec that wrote the data
    pub fn decode(&self, id: u8, data: &[u8]) -> Result<Payload> {
        let codec = self.by_id(id).ok_or_else(|| Error::Decode {
            codec: format!("{:#04x}", id),
            reason: "unknown codec id".into(),
        })?;
        codec.decode(data)
    }

    /// Active codec names per class
    pub fn active_codecs(&self) -> Vec<(ValueClass, &'static str)> {
        let snapshot = self.current();
        ValueClass::ALL
            .iter()
            .filter_map(|class| snapshot.active.get(class).map(|c| (*class, c.name())))
            .collect()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
