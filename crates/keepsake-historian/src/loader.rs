//! The load walk.
//!
//! Loading is two-phase per object: resolve the helper, construct a blank
//! instance, register its handle, then restore state into it. Registering
//! before restoring is what terminates reference cycles. The walk runs in one
//! of two modes: live loads resolve every reference to the referent's latest
//! version and feed the identity map; snapshot loads pin every reference at
//! exactly its stored version and track nothing.

use keepsake_archive::Archive;
use keepsake_record::DataRecord;
use keepsake_types::{ObjectId, SnapshotRef, Value};
use tracing::warn;

use crate::depositor::{EMBED_SCHEMA, EMBED_STATE, EMBED_TYPE};
use crate::error::{HistorianError, Result};
use crate::handle::AnyObj;
use crate::helper::Loader;
use crate::migration::upgrade_state;
use crate::registry::TypeRegistry;
use crate::transaction::{LiveObjects, Transaction};

/// How the walk resolves stored references.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadMode {
    /// Resolve by object id to the latest version; track loaded instances.
    Live,
    /// Resolve to exactly the stored version; track nothing.
    Snapshot,
}

pub(crate) struct ObjectLoader<'a> {
    registry: &'a TypeRegistry,
    archive: &'a dyn Archive,
    live: &'a LiveObjects,
    txn: &'a mut Transaction,
    mode: LoadMode,
}

impl<'a> ObjectLoader<'a> {
    pub(crate) fn new(
        registry: &'a TypeRegistry,
        archive: &'a dyn Archive,
        live: &'a LiveObjects,
        txn: &'a mut Transaction,
        mode: LoadMode,
    ) -> Self {
        Self {
            registry,
            archive,
            live,
            txn,
            mode,
        }
    }

    /// Load the latest version of an object, reusing the tracked instance if
    /// this historian already holds one.
    pub(crate) fn load_latest(&mut self, object_id: ObjectId) -> Result<AnyObj> {
        if let Some(object) = self.txn.loaded(object_id) {
            return Ok(object.clone());
        }
        if let Some(object) = self.live.get_object(object_id) {
            // Identity map hit: the caller gets the instance as it is, even
            // if the archive has moved on. Refreshing is an explicit reload.
            return Ok(object.clone());
        }
        let record = self.archive.get(object_id, None)?;
        if record.is_deleted() {
            return Err(HistorianError::ObjectDeleted { object_id });
        }
        self.instantiate(record)
    }

    /// Load exactly one stored snapshot, detached from the identity map.
    pub(crate) fn load_pinned(&mut self, snapshot: SnapshotRef) -> Result<AnyObj> {
        if let Some(object) = self.txn.snapshot(snapshot) {
            return Ok(object.clone());
        }
        let record = self
            .archive
            .get(snapshot.object_id, Some(snapshot.version))?;
        if record.is_deleted() {
            return Err(HistorianError::ObjectDeleted {
                object_id: snapshot.object_id,
            });
        }
        self.instantiate(record)
    }

    fn instantiate(&mut self, record: DataRecord) -> Result<AnyObj> {
        let helper = self.registry.resolve_by_id(&record.type_id)?;
        let snapshot = record.snapshot_ref();
        let state = record
            .state_value()
            .ok_or_else(|| HistorianError::decoding(snapshot.to_string(), "record has no state"))?
            .clone();

        // Upgrade the state in memory if it predates the helper's schema.
        // The stored record stays as written; only an explicit migrate
        // rewrites the archive.
        let state = if record.state_schema_version == helper.schema_version() {
            state
        } else {
            warn!(
                %snapshot,
                stored = record.state_schema_version,
                current = helper.schema_version(),
                "upgrading stored state on load"
            );
            upgrade_state(&*helper, record.state_schema_version, state, self)?
        };

        let blank = helper.new_blank();
        match self.mode {
            LoadMode::Live => {
                self.txn.note_loaded(record.object_id, blank.clone());
                self.txn.track_on_commit(blank.clone(), record);
            }
            LoadMode::Snapshot => {
                self.txn.note_snapshot(snapshot, blank.clone());
            }
        }
        helper.restore_any(&blank, &state, self)?;
        Ok(blank)
    }
}

impl Loader for ObjectLoader<'_> {
    fn load_ref_any(&mut self, snapshot: SnapshotRef) -> Result<AnyObj> {
        match self.mode {
            LoadMode::Live => self.load_latest(snapshot.object_id),
            LoadMode::Snapshot => self.load_pinned(snapshot),
        }
    }

    fn decode_value_any(&mut self, value: &Value) -> Result<AnyObj> {
        let type_id = value
            .get(EMBED_TYPE)
            .and_then(Value::as_text)
            .ok_or_else(|| HistorianError::decoding(EMBED_TYPE, "missing or not text"))?;
        let type_id = keepsake_types::TypeId::new(type_id);
        let schema = value
            .get(EMBED_SCHEMA)
            .and_then(Value::as_int)
            .ok_or_else(|| HistorianError::decoding(EMBED_SCHEMA, "missing or not an integer"))?;
        let schema = u32::try_from(schema)
            .map_err(|_| HistorianError::decoding(EMBED_SCHEMA, "out of range"))?;
        let state = value
            .get(EMBED_STATE)
            .ok_or_else(|| HistorianError::decoding(EMBED_STATE, "missing"))?
            .clone();

        let helper = self.registry.resolve_by_id(&type_id)?;
        let state = if schema == helper.schema_version() {
            state
        } else {
            upgrade_state(&*helper, schema, state, self)?
        };

        // By-value objects are plain data: a fresh instance per decode,
        // never entered into the identity map.
        let blank = helper.new_blank();
        helper.restore_any(&blank, &state, self)?;
        Ok(blank)
    }
}
