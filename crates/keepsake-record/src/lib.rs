//! Immutable snapshot records.
//!
//! A [`DataRecord`] describes exactly one snapshot of one object: its
//! identity and lineage, the encoded state, the schema version that produced
//! the encoding, a deterministic content hash, and timestamps. Records are
//! never mutated after creation — a new version of an object is a new
//! record, and deletion is a terminal tombstone record.
//!
//! # Modules
//!
//! - [`record`] — [`DataRecord`], [`RecordState`], and [`RecordBuilder`]
//! - [`extras`] — Well-known keys for the free-form extras map

pub mod extras;
pub mod record;

pub use record::{DataRecord, RecordBuilder, RecordState};
