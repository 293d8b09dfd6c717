//! Error types for archive operations.

use keepsake_types::ObjectId;
use thiserror::Error;

/// Errors that can occur during archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The requested record does not exist.
    #[error("record not found: {object_id}{}", version.map(|v| format!("#{v}")).unwrap_or_default())]
    RecordNotFound {
        object_id: ObjectId,
        version: Option<u64>,
    },

    /// The compare-and-swap append lost against another writer.
    ///
    /// The caller's view of the object is stale: reload, merge, and retry.
    #[error("concurrent modification of {object_id}: expected to append version {attempted}, but latest is {latest}")]
    ConcurrentModification {
        object_id: ObjectId,
        attempted: u64,
        latest: u64,
    },

    /// The object has a deletion tombstone; no further records may follow.
    #[error("object is deleted: {object_id}")]
    ObjectDeleted { object_id: ObjectId },

    /// An append would violate record-stream integrity (e.g. a version gap).
    #[error("integrity violation for {object_id}: {reason}")]
    IntegrityViolation { object_id: ObjectId, reason: String },

    /// The backing store is unusable (poisoned lock, lost connection).
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Convenience type alias for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
