//! Foundation types for keepsake.
//!
//! keepsake versions arbitrary in-memory objects: every save produces an
//! immutable snapshot record, and old snapshots remain addressable forever.
//! This crate holds the vocabulary everything else is built from:
//!
//! - [`ObjectId`] — the stable identity an object gains at first save
//! - [`SnapshotRef`] — a frozen pointer to one (object, version) snapshot
//! - [`TypeId`] — the stable identifier binding records to a type helper
//! - [`Value`] — the encoded state tree stored inside a record
//! - [`ContentHash`] / [`StateHasher`] — deterministic state hashing
//!
//! # Modules
//!
//! - [`error`] — Error types for parsing and conversion
//! - [`id`] — [`ObjectId`] and [`SnapshotRef`]
//! - [`type_id`] — Stable helper identifiers
//! - [`value`] — The encoded state tree
//! - [`hash`] — Domain-separated BLAKE3 state hashing

pub mod error;
pub mod hash;
pub mod id;
pub mod type_id;
pub mod value;

pub use error::{Result, TypeError};
pub use hash::{ContentHash, StateHasher};
pub use id::{ObjectId, SnapshotRef};
pub use type_id::TypeId;
pub use value::Value;
