//! Deterministic, domain-separated hashing of encoded state.
//!
//! The content hash of a snapshot is the BLAKE3 hash of a canonical byte
//! encoding of its state tree plus the owning type id. Two snapshots with
//! equal state always produce the same hash — this is what makes re-saving
//! an unchanged object a no-op — and map fields hash identically regardless
//! of the order they were built in, because [`Value::Map`] is canonically
//! ordered.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::type_id::TypeId;
use crate::value::Value;

/// BLAKE3 hash of a snapshot's encoded state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Variant tags for the canonical encoding. Stable: changing any of these
// changes every stored content hash.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_REF: u8 = 8;

/// Domain-separated BLAKE3 state hasher.
///
/// Each hasher carries a domain tag that is fed into every hash, so hashes
/// from different contexts (live state, tombstones) can never collide.
pub struct StateHasher {
    domain: &'static str,
}

impl StateHasher {
    /// Hasher for snapshot state.
    pub const STATE: Self = Self {
        domain: "keepsake-state-v1",
    };
    /// Hasher for deletion tombstones, which carry no state.
    pub const TOMBSTONE: Self = Self {
        domain: "keepsake-tombstone-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash an encoded state tree together with its owning type id.
    pub fn hash_state(&self, type_id: &TypeId, state: &Value) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        write_str(&mut hasher, type_id.as_str());
        write_value(&mut hasher, state);
        ContentHash(*hasher.finalize().as_bytes())
    }

    /// Hash with no state at all (deletion tombstones).
    pub fn hash_empty(&self, type_id: &TypeId) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        write_str(&mut hasher, type_id.as_str());
        ContentHash(*hasher.finalize().as_bytes())
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

fn write_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn write_value(hasher: &mut blake3::Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
        Value::Bool(b) => {
            hasher.update(&[TAG_BOOL, u8::from(*b)]);
        }
        Value::Int(i) => {
            hasher.update(&[TAG_INT]);
            hasher.update(&i.to_le_bytes());
        }
        Value::Float(f) => {
            hasher.update(&[TAG_FLOAT]);
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            hasher.update(&[TAG_TEXT]);
            write_str(hasher, s);
        }
        Value::Bytes(b) => {
            hasher.update(&[TAG_BYTES]);
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
        Value::List(items) => {
            hasher.update(&[TAG_LIST]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Map(map) => {
            // BTreeMap iteration is key-ordered, giving one canonical form.
            hasher.update(&[TAG_MAP]);
            hasher.update(&(map.len() as u64).to_le_bytes());
            for (key, val) in map {
                write_str(hasher, key);
                write_value(hasher, val);
            }
        }
        Value::Ref(sref) => {
            hasher.update(&[TAG_REF]);
            hasher.update(sref.object_id.as_uuid().as_bytes());
            hasher.update(&sref.version.to_le_bytes());
        }
    }
}
