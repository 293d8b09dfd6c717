//! Error types for historian operations.

use keepsake_archive::ArchiveError;
use keepsake_types::{ObjectId, TypeId};
use thiserror::Error;

/// Errors that can occur while saving, loading, or migrating objects.
#[derive(Debug, Error)]
pub enum HistorianError {
    /// No helper has been registered for this Rust type.
    #[error("no helper registered for type {type_name}")]
    UnregisteredType { type_name: String },

    /// A stored record names a type id no registered helper claims.
    #[error("no helper registered for type id '{type_id}'")]
    UnregisteredTypeId { type_id: TypeId },

    /// Two different helpers tried to claim the same type id.
    #[error("type id '{type_id}' is already registered to a different type")]
    DuplicateTypeId { type_id: TypeId },

    /// The requested record does not exist.
    #[error("record not found: {object_id}{}", version.map(|v| format!("#{v}")).unwrap_or_default())]
    RecordNotFound {
        object_id: ObjectId,
        version: Option<u64>,
    },

    /// The instance is not tracked by this historian (never saved or loaded
    /// through it, or forgotten since).
    #[error("object is not tracked by this historian")]
    NotTracked,

    /// The object has a deletion tombstone.
    #[error("object is deleted: {object_id}")]
    ObjectDeleted { object_id: ObjectId },

    /// Another writer advanced the object past the version we know about.
    ///
    /// Reload the object, reapply the change, and save again.
    #[error("concurrent modification of {object_id}: known version {known}, but latest is {latest}")]
    ConcurrentModification {
        object_id: ObjectId,
        known: u64,
        latest: u64,
    },

    /// A by-value embedded object transitively contained itself. Cycles must
    /// go through references, which give each participant its own record.
    #[error("cycle through by-value embedded object of type {type_name}; store one side by reference instead")]
    CyclicValueEmbedding { type_name: String },

    /// The migrations a helper declares do not form an unbroken chain from
    /// the stored schema version up to the current one.
    #[error("broken migration chain for '{type_id}': no path from schema version {from} to {to}")]
    BrokenMigrationChain { type_id: TypeId, from: u32, to: u32 },

    /// A helper failed to encode an object's state.
    #[error("encoding failed at {path}: {reason}")]
    Encoding { path: String, reason: String },

    /// A stored state could not be decoded back into an object.
    #[error("decoding failed at {path}: {reason}")]
    Decoding { path: String, reason: String },

    /// A loaded object was not of the type the caller asked for.
    #[error("loaded object is not of the requested type {expected}")]
    TypeMismatch { expected: String },

    /// An object's lock was poisoned by a panicking writer.
    #[error("object lock poisoned: {0}")]
    Poisoned(String),

    /// The archive refused an operation for a reason we do not translate.
    #[error(transparent)]
    Archive(ArchiveError),
}

impl HistorianError {
    /// An [`Encoding`](Self::Encoding) error at a state path.
    pub fn encoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encoding {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// A [`Decoding`](Self::Decoding) error at a state path.
    pub fn decoding(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decoding {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<ArchiveError> for HistorianError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::RecordNotFound { object_id, version } => {
                Self::RecordNotFound { object_id, version }
            }
            ArchiveError::ConcurrentModification {
                object_id,
                attempted,
                latest,
            } => Self::ConcurrentModification {
                object_id,
                known: attempted.saturating_sub(1),
                latest,
            },
            ArchiveError::ObjectDeleted { object_id } => Self::ObjectDeleted { object_id },
            other => Self::Archive(other),
        }
    }
}

/// Convenience type alias for historian operations.
pub type Result<T> = std::result::Result<T, HistorianError>;
