use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Stable identity of a versioned object.
///
/// An `ObjectId` is allocated once, the first time an object is saved, and
/// identifies the object across all of its snapshots. It is opaque and never
/// reused; equality of ids means "the same logical object", independent of
/// version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Allocate a fresh object id.
    ///
    /// Ids are UUIDv7, so they sort roughly by allocation time.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Reconstruct an id from its raw UUID form.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The raw UUID backing this id.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from the hyphenated string form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidObjectId(e.to_string()))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A frozen pointer to one snapshot: an object id plus a version number.
///
/// Versions start at 0 and increase strictly with every new snapshot of the
/// object. A `SnapshotRef` always pins an exact version; "latest" is
/// expressed by addressing an [`ObjectId`] instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotRef {
    /// The object this snapshot belongs to.
    pub object_id: ObjectId,
    /// The version of the snapshot, starting at 0.
    pub version: u64,
}

impl SnapshotRef {
    /// Create a reference to the given version of an object.
    pub const fn new(object_id: ObjectId, version: u64) -> Self {
        Self { object_id, version }
    }

    /// Reference to the next version of the same object.
    pub const fn child(&self) -> Self {
        Self {
            object_id: self.object_id,
            version: self.version + 1,
        }
    }

    /// Parse from the `{object_id}#{version}` string form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (id, version) = s
            .split_once('#')
            .ok_or_else(|| TypeError::InvalidSnapshotRef(format!("missing '#' in '{s}'")))?;
        let object_id = ObjectId::parse(id)?;
        let version = version
            .parse::<u64>()
            .map_err(|e| TypeError::InvalidSnapshotRef(e.to_string()))?;
        Ok(Self { object_id, version })
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_id, self.version)
    }
}

impl FromStr for SnapshotRef {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
