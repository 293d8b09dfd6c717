//! Well-known keys for the free-form extras map carried by every record.
//!
//! Extras hold provenance that is not part of the object's state and does
//! not contribute to the content hash. Applications may add their own keys;
//! the ones below are reserved, and [`COPIED_FROM`] is read back through
//! [`DataRecord::copied_from`](crate::DataRecord::copied_from).

/// Id of the historian session that first saved the object. Stamped on every
/// version-0 record and carried forward to later versions.
pub const CREATED_BY: &str = "_created_by";

/// Snapshot reference this object was copied from, if it originated as a
/// copy of another saved object.
pub const COPIED_FROM: &str = "_copied_from";
