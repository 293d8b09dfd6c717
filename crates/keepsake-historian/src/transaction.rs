//! The identity map and the staging transaction.
//!
//! [`LiveObjects`] is the historian's long-lived view: for every tracked
//! object it holds the shared handle (so repeat loads return the same
//! instance) and the latest record it knows about (so repeat saves build the
//! next version). [`Transaction`] is the scratch state of one save or load
//! walk; nothing in it touches the archive or the identity map until
//! [`commit`](Transaction::commit), which pushes every staged record in one
//! atomic batch.

use std::collections::{HashMap, HashSet};

use keepsake_archive::Archive;
use keepsake_record::DataRecord;
use keepsake_types::{ObjectId, SnapshotRef};

use crate::error::Result;
use crate::handle::{instance_key, AnyObj};

/// Objects this historian currently tracks.
#[derive(Default)]
pub struct LiveObjects {
    by_id: HashMap<ObjectId, AnyObj>,
    records: HashMap<usize, DataRecord>,
}

impl LiveObjects {
    /// Track an instance against its latest known record.
    pub fn insert(&mut self, object: AnyObj, record: DataRecord) {
        let object_id = record.object_id;
        if let Some(previous) = self.by_id.get(&object_id) {
            // A different instance may take over an object id (e.g. after a
            // forget-and-reload); drop the stale pointer entry.
            let stale = instance_key(previous);
            if stale != instance_key(&object) {
                self.records.remove(&stale);
            }
        }
        self.records.insert(instance_key(&object), record);
        self.by_id.insert(object_id, object);
    }

    /// The tracked instance for an object id, if any.
    pub fn get_object(&self, object_id: ObjectId) -> Option<&AnyObj> {
        self.by_id.get(&object_id)
    }

    /// The latest known record for a tracked instance.
    pub fn record_for_key(&self, key: usize) -> Option<&DataRecord> {
        self.records.get(&key)
    }

    /// Stop tracking an object id. Returns whether it was tracked.
    pub fn remove(&mut self, object_id: ObjectId) -> bool {
        match self.by_id.remove(&object_id) {
            Some(object) => {
                self.records.remove(&instance_key(&object));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Scratch state for one save or load walk.
#[derive(Default)]
pub struct Transaction {
    /// Records to append at commit, in staging order.
    staged: Vec<DataRecord>,
    /// Objects currently being encoded, keyed by instance: a re-entrant save
    /// (a reference cycle) resolves to the reference already handed out.
    in_progress: HashMap<usize, SnapshotRef>,
    /// Objects fully handled this walk; repeat saves are free.
    finished: HashMap<usize, SnapshotRef>,
    /// Instances on the current by-value encoding path, for cycle detection.
    value_stack: HashSet<usize>,
    /// Instances to start tracking at commit, with their new records.
    live_inserts: Vec<(AnyObj, DataRecord)>,
    /// Instances loaded (latest-version) this walk, visible to re-entrant
    /// loads before commit.
    live_loaded: HashMap<ObjectId, AnyObj>,
    /// Pinned snapshot instances decoded this walk, so a snapshot graph
    /// shares referents internally.
    snapshots: HashMap<SnapshotRef, AnyObj>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, record: DataRecord) {
        self.staged.push(record);
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    pub fn mark_in_progress(&mut self, key: usize, snapshot: SnapshotRef) {
        self.in_progress.insert(key, snapshot);
    }

    pub fn clear_in_progress(&mut self, key: usize) {
        self.in_progress.remove(&key);
    }

    /// The reference a cycle partner embeds for an in-progress instance,
    /// if any.
    pub fn in_progress_ref(&self, key: usize) -> Option<SnapshotRef> {
        self.in_progress.get(&key).copied()
    }

    pub fn mark_finished(&mut self, key: usize, snapshot: SnapshotRef) {
        self.finished.insert(key, snapshot);
    }

    pub fn finished_ref(&self, key: usize) -> Option<SnapshotRef> {
        self.finished.get(&key).copied()
    }

    /// Push an instance onto the by-value path. False if it is already
    /// there, i.e. the embedding is cyclic.
    pub fn enter_value(&mut self, key: usize) -> bool {
        self.value_stack.insert(key)
    }

    pub fn exit_value(&mut self, key: usize) {
        self.value_stack.remove(&key);
    }

    pub fn track_on_commit(&mut self, object: AnyObj, record: DataRecord) {
        self.live_inserts.push((object, record));
    }

    pub fn note_loaded(&mut self, object_id: ObjectId, object: AnyObj) {
        self.live_loaded.insert(object_id, object);
    }

    pub fn loaded(&self, object_id: ObjectId) -> Option<&AnyObj> {
        self.live_loaded.get(&object_id)
    }

    pub fn note_snapshot(&mut self, snapshot: SnapshotRef, object: AnyObj) {
        self.snapshots.insert(snapshot, object);
    }

    pub fn snapshot(&self, snapshot: SnapshotRef) -> Option<&AnyObj> {
        self.snapshots.get(&snapshot)
    }

    /// Append every staged record atomically, then fold the walk's results
    /// into the identity map. On archive failure nothing becomes visible.
    pub fn commit(self, archive: &dyn Archive, live: &mut LiveObjects) -> Result<()> {
        if !self.staged.is_empty() {
            archive.insert_many(self.staged)?;
        }
        for (object, record) in self.live_inserts {
            live.insert(object, record);
        }
        Ok(())
    }
}
