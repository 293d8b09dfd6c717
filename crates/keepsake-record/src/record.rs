use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keepsake_types::{ContentHash, ObjectId, SnapshotRef, StateHasher, TypeId, Value};

use crate::extras;

/// The payload of a record: either a snapshot of state or a tombstone.
///
/// A tombstone marks the object as deleted and is terminal — no record with
/// a higher version may follow it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordState {
    /// The encoded state of the object at this version.
    Snapshot(Value),
    /// The object was deleted at this version.
    Deleted,
}

impl RecordState {
    /// Returns `true` if this is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// The encoded state, if this is a snapshot.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Snapshot(value) => Some(value),
            Self::Deleted => None,
        }
    }
}

/// An immutable record describing one snapshot of an object.
///
/// For a fixed `object_id`, records are totally ordered by `version` with no
/// gaps from 0. The `content_hash` is reproducible from the encoded state
/// and type id alone, so an unchanged object re-saved produces the same hash
/// and no new record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Identity of the object, spanning all of its snapshots.
    pub object_id: ObjectId,
    /// Stable id of the helper that encoded the state.
    pub type_id: TypeId,
    /// When the object was first saved (carried forward to every version).
    pub created_time: DateTime<Utc>,
    /// Version of this snapshot, starting at 0.
    pub version: u64,
    /// Encoded state or deletion tombstone.
    pub state: RecordState,
    /// Schema version of the helper that produced the encoding.
    pub state_schema_version: u32,
    /// Deterministic hash of the state and type id.
    pub content_hash: ContentHash,
    /// When this snapshot was taken.
    pub snapshot_time: DateTime<Utc>,
    /// Free-form provenance metadata; see [`crate::extras`].
    pub extras: BTreeMap<String, Value>,
}

impl DataRecord {
    /// The snapshot reference addressing exactly this record.
    pub fn snapshot_ref(&self) -> SnapshotRef {
        SnapshotRef::new(self.object_id, self.version)
    }

    /// Returns `true` if this record is a deletion tombstone.
    pub fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    /// The encoded state, if this record is a snapshot.
    pub fn state_value(&self) -> Option<&Value> {
        self.state.as_value()
    }

    /// Snapshot references of every object this record's state points to.
    pub fn references(&self) -> Vec<SnapshotRef> {
        self.state_value()
            .map(Value::references)
            .unwrap_or_default()
    }

    /// Look up an extras entry. Returns `None` if the key is absent.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    /// The snapshot this object was copied from, if recorded.
    pub fn copied_from(&self) -> Option<SnapshotRef> {
        self.extra(extras::COPIED_FROM)
            .and_then(Value::as_snapshot_ref)
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] v{} {}",
            self.object_id,
            self.type_id,
            self.version,
            if self.is_deleted() {
                "deleted".to_string()
            } else {
                self.content_hash.short_hex()
            }
        )
    }
}

/// Builder for [`DataRecord`]s.
///
/// Three entry points cover the whole record lifecycle: [`RecordBuilder::new`]
/// for an object's first snapshot (version 0), [`RecordBuilder::child_of`]
/// for the next version of an existing record, and
/// [`RecordBuilder::deleted_child_of`] for the terminal tombstone.
#[derive(Debug)]
pub struct RecordBuilder {
    object_id: ObjectId,
    type_id: TypeId,
    created_time: DateTime<Utc>,
    version: u64,
    state: RecordState,
    state_schema_version: u32,
    extras: BTreeMap<String, Value>,
}

impl RecordBuilder {
    /// Start a version-0 record for a newly tracked object.
    pub fn new(object_id: ObjectId, type_id: TypeId, state_schema_version: u32) -> Self {
        Self {
            object_id,
            type_id,
            created_time: Utc::now(),
            version: 0,
            state: RecordState::Snapshot(Value::Null),
            state_schema_version,
            extras: BTreeMap::new(),
        }
    }

    /// Start the next version of an existing record.
    ///
    /// Object id, type id, creation time and extras carry over; the version
    /// is incremented by one.
    pub fn child_of(record: &DataRecord, state_schema_version: u32) -> Self {
        Self {
            object_id: record.object_id,
            type_id: record.type_id.clone(),
            created_time: record.created_time,
            version: record.version + 1,
            state: RecordState::Snapshot(Value::Null),
            state_schema_version,
            extras: record.extras.clone(),
        }
    }

    /// Start the terminal tombstone record for an existing record.
    pub fn deleted_child_of(record: &DataRecord) -> Self {
        let mut builder = Self::child_of(record, record.state_schema_version);
        builder.state = RecordState::Deleted;
        builder
    }

    /// Set the encoded state.
    pub fn state(mut self, state: Value) -> Self {
        self.state = RecordState::Snapshot(state);
        self
    }

    /// Add an extras entry.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// The object id the record will carry.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// The version the record will carry.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The snapshot reference the built record will answer to.
    pub fn snapshot_ref(&self) -> SnapshotRef {
        SnapshotRef::new(self.object_id, self.version)
    }

    /// Finalize the record, computing its content hash and snapshot time.
    pub fn build(self) -> DataRecord {
        let content_hash = match &self.state {
            RecordState::Snapshot(value) => StateHasher::STATE.hash_state(&self.type_id, value),
            RecordState::Deleted => StateHasher::TOMBSTONE.hash_empty(&self.type_id),
        };
        DataRecord {
            object_id: self.object_id,
            type_id: self.type_id,
            created_time: self.created_time,
            version: self.version,
            state: self.state,
            state_schema_version: self.state_schema_version,
            content_hash,
            snapshot_time: Utc::now(),
            extras: self.extras,
        }
    }
}
