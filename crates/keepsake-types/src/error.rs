//! Error types for parsing and converting foundation types.

use thiserror::Error;

/// Errors from parsing or converting foundation types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    /// A hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A byte slice had the wrong length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// An object id string could not be parsed.
    #[error("invalid object id: {0}")]
    InvalidObjectId(String),

    /// A snapshot reference string could not be parsed.
    #[error("invalid snapshot ref: {0}")]
    InvalidSnapshotRef(String),
}

/// Convenience type alias for foundation type operations.
pub type Result<T> = std::result::Result<T, TypeError>;
