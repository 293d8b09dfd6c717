use keepsake_record::DataRecord;
use keepsake_types::{ObjectId, SnapshotRef, Value};

use crate::error::Result;
use crate::query::Query;

/// The persistence backend for data records.
///
/// All implementations must satisfy these invariants:
/// - Records are immutable once inserted; a new state is a new version.
/// - `insert` has compare-and-swap semantics: it succeeds only if the
///   record's version is exactly one past the current latest (or 0 for a
///   new object id). This is the sole serialization point for concurrent
///   writers.
/// - For a fixed object id, stored versions are strictly increasing with no
///   gaps from 0.
/// - A deletion tombstone is terminal: nothing may be appended after it.
/// - `rewrite_state` is the single sanctioned mutation, used only by the
///   explicit migration rewrite; it replaces a record's encoded state
///   without touching its version or lineage.
pub trait Archive: Send + Sync {
    /// Append one record, CAS-checked against the current latest version.
    ///
    /// Fails with [`ArchiveError::ConcurrentModification`] if another writer
    /// has advanced the object past the version this record expects.
    ///
    /// [`ArchiveError::ConcurrentModification`]: crate::ArchiveError::ConcurrentModification
    fn insert(&self, record: DataRecord) -> Result<()>;

    /// Append a batch of records atomically: every CAS precondition is
    /// validated before anything is written, and either all records become
    /// visible together or none do. This is the transaction commit point.
    fn insert_many(&self, records: Vec<DataRecord>) -> Result<()>;

    /// Fetch one record. `None` means the latest version.
    fn get(&self, object_id: ObjectId, version: Option<u64>) -> Result<DataRecord>;

    /// The latest stored version for an object id, if any records exist.
    fn latest_version(&self, object_id: ObjectId) -> Result<Option<u64>>;

    /// All records for an object id, ascending by version.
    fn history(&self, object_id: ObjectId) -> Result<Vec<DataRecord>>;

    /// Latest records matching a query. Tombstoned objects never match.
    fn query(&self, query: &Query) -> Result<Vec<DataRecord>>;

    /// Replace the encoded state of one existing snapshot in place.
    ///
    /// Only the explicit migration rewrite calls this; loading never does.
    /// The record's content hash is recomputed from the new state.
    fn rewrite_state(
        &self,
        snapshot: SnapshotRef,
        state: Value,
        state_schema_version: u32,
    ) -> Result<()>;
}
