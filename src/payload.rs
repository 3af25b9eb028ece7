//! Payloads
//!
//! Tagged union for everything the core stores or schedules. Cache values,
//! batch task inputs and batch handler results are all [`Payload`]s; the
//! [`ValueClass`] picks the codec used when a payload is persisted.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Logical class of a payload, used to select a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueClass {
    /// Opaque bytes
    Raw,
    /// UTF-8 text (compressed messages, prompts)
    Text,
    /// Dense float vector
    Embedding,
    /// JSON document (extracted facts, search results)
    Structured,
}

impl ValueClass {
    /// All classes, in tag order
    pub const ALL: [ValueClass; 4] = [
        ValueClass::Raw,
        ValueClass::Text,
        ValueClass::Embedding,
        ValueClass::Structured,
    ];

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ValueClass::Raw => "raw",
            ValueClass::Text => "text",
            ValueClass::Embedding => "embedding",
            ValueClass::Structured => "structured",
        }
    }

    /// Stable one-byte tag written into persisted entries
    pub fn tag(&self) -> u8 {
        match self {
            ValueClass::Raw => 0,
            ValueClass::Text => 1,
            ValueClass::Embedding => 2,
            ValueClass::Structured => 3,
        }
    }

    /// Inverse of [`ValueClass::tag`]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueClass::Raw),
            1 => Some(ValueClass::Text),
            2 => Some(ValueClass::Embedding),
            3 => Some(ValueClass::Structured),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A cacheable / schedulable value
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque bytes
    Raw(Bytes),
    /// UTF-8 text
    Text(String),
    /// Dense float vector
    Embedding(Vec<f32>),
    /// JSON document
    Structured(serde_json::Value),
}

impl Payload {
    /// Class of this payload
    pub fn class(&self) -> ValueClass {
        match self {
            Payload::Raw(_) => ValueClass::Raw,
            Payload::Text(_) => ValueClass::Text,
            Payload::Embedding(_) => ValueClass::Embedding,
            Payload::Structured(_) => ValueClass::Structured,
        }
    }

    /// Estimated in-memory footprint, used for the L2 byte bound
    pub fn estimated_size(&self) -> u64 {
        match self {
            Payload::Raw(b) => b.len() as u64,
            Payload::Text(s) => s.len() as u64,
            Payload::Embedding(v) => (v.len() * std::mem::size_of::<f32>()) as u64,
            Payload::Structured(v) => serde_json::to_vec(v).map(|b| b.len() as u64).unwrap_or(0),
        }
    }

    /// Borrow as text, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as an embedding, if this is an embedding payload
    pub fn as_embedding(&self) -> Option<&[f32]> {
        match self {
            Payload::Embedding(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as JSON, if this is a structured payload
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow as raw bytes, if this is a raw payload
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(b) => Some(b),
            _ => None,
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<Vec<f32>> for Payload {
    fn from(v: Vec<f32>) -> Self {
        Payload::Embedding(v)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Raw(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Structured(v)
    }
}
