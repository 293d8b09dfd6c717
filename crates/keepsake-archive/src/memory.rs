//! In-memory archive for tests and ephemeral use.
//!
//! [`InMemoryArchive`] keeps every record stream in a `HashMap` behind a
//! `RwLock`. It implements the full [`Archive`] trait, including the
//! compare-and-swap append and the all-or-nothing batch insert, and is
//! suitable for unit tests and short-lived processes.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use keepsake_record::{DataRecord, RecordState};
use keepsake_types::{ObjectId, SnapshotRef, StateHasher, Value};

use crate::error::{ArchiveError, Result};
use crate::query::Query;
use crate::traits::Archive;

/// An in-memory implementation of [`Archive`].
///
/// All data lives in a `HashMap` behind a `RwLock` and is lost when the
/// archive is dropped. Each map entry is one object's record stream, indexed
/// by version.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    streams: RwLock<HashMap<ObjectId, Vec<DataRecord>>>,
}

impl InMemoryArchive {
    /// Create a new empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all objects.
    pub fn record_count(&self) -> usize {
        self.streams
            .read()
            .map(|streams| streams.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// Check the CAS precondition for appending `record` to a stream that
/// currently holds `current_len` records, the last of which may be a
/// tombstone.
fn check_append(record: &DataRecord, current_len: u64, tombstoned: bool) -> Result<()> {
    if tombstoned {
        return Err(ArchiveError::ObjectDeleted {
            object_id: record.object_id,
        });
    }
    if record.version < current_len {
        return Err(ArchiveError::ConcurrentModification {
            object_id: record.object_id,
            attempted: record.version,
            latest: current_len - 1,
        });
    }
    if record.version > current_len {
        return Err(ArchiveError::IntegrityViolation {
            object_id: record.object_id,
            reason: format!(
                "append would leave a gap: version {} after {} record(s)",
                record.version, current_len
            ),
        });
    }
    Ok(())
}

impl Archive for InMemoryArchive {
    fn insert(&self, record: DataRecord) -> Result<()> {
        self.insert_many(vec![record])
    }

    fn insert_many(&self, records: Vec<DataRecord>) -> Result<()> {
        let mut streams = self
            .streams
            .write()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;

        // Validate every precondition first so the batch is all-or-nothing,
        // tracking versions and tombstones contributed by earlier records in
        // the same batch.
        let mut pending: HashMap<ObjectId, (u64, bool)> = HashMap::new();
        for record in &records {
            let (len, tombstoned) = pending
                .entry(record.object_id)
                .or_insert_with(|| match streams.get(&record.object_id) {
                    Some(stream) => (
                        stream.len() as u64,
                        stream.last().is_some_and(DataRecord::is_deleted),
                    ),
                    None => (0, false),
                });
            check_append(record, *len, *tombstoned)?;
            *len += 1;
            *tombstoned = record.is_deleted();
        }

        let count = records.len();
        for record in records {
            debug!(object_id = %record.object_id, version = record.version, "archive insert");
            streams.entry(record.object_id).or_default().push(record);
        }
        debug!(count, "archive batch committed");
        Ok(())
    }

    fn get(&self, object_id: ObjectId, version: Option<u64>) -> Result<DataRecord> {
        let streams = self
            .streams
            .read()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;
        let stream = streams
            .get(&object_id)
            .ok_or(ArchiveError::RecordNotFound { object_id, version })?;
        let record = match version {
            Some(v) => stream.get(v as usize),
            None => stream.last(),
        };
        record
            .cloned()
            .ok_or(ArchiveError::RecordNotFound { object_id, version })
    }

    fn latest_version(&self, object_id: ObjectId) -> Result<Option<u64>> {
        let streams = self
            .streams
            .read()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;
        Ok(streams
            .get(&object_id)
            .and_then(|stream| stream.last())
            .map(|record| record.version))
    }

    fn history(&self, object_id: ObjectId) -> Result<Vec<DataRecord>> {
        let streams = self
            .streams
            .read()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;
        streams
            .get(&object_id)
            .cloned()
            .ok_or(ArchiveError::RecordNotFound {
                object_id,
                version: None,
            })
    }

    fn query(&self, query: &Query) -> Result<Vec<DataRecord>> {
        let streams = self
            .streams
            .read()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;
        let mut results: Vec<DataRecord> = streams
            .values()
            .filter_map(|stream| stream.last())
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        // Deterministic order for callers and tests.
        results.sort_by_key(|record| record.object_id);
        if let Some(limit) = query.limit() {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn rewrite_state(
        &self,
        snapshot: SnapshotRef,
        state: Value,
        state_schema_version: u32,
    ) -> Result<()> {
        let mut streams = self
            .streams
            .write()
            .map_err(|e| ArchiveError::Storage(format!("lock poisoned: {e}")))?;
        let record = streams
            .get_mut(&snapshot.object_id)
            .and_then(|stream| stream.get_mut(snapshot.version as usize))
            .ok_or(ArchiveError::RecordNotFound {
                object_id: snapshot.object_id,
                version: Some(snapshot.version),
            })?;
        if record.is_deleted() {
            return Err(ArchiveError::ObjectDeleted {
                object_id: snapshot.object_id,
            });
        }
        record.content_hash = StateHasher::STATE.hash_state(&record.type_id, &state);
        record.state = RecordState::Snapshot(state);
        record.state_schema_version = state_schema_version;
        debug!(snapshot = %snapshot, schema = state_schema_version, "state rewritten");
        Ok(())
    }
}
