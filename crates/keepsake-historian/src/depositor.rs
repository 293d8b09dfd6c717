//! The save walk.
//!
//! A [`Depositor`] drives one transaction's worth of saving: it resolves each
//! object's helper, registers the reference cycle back-edges should embed
//! *before* encoding, stages the built record, and elides the whole thing
//! when the content hash shows the object unchanged.

use keepsake_archive::Archive;
use keepsake_record::{extras, RecordBuilder};
use keepsake_types::{ObjectId, SnapshotRef, Value};
use tracing::{debug, trace};

use crate::error::{HistorianError, Result};
use crate::handle::{instance_key, AnyObj};
use crate::helper::Saver;
use crate::registry::TypeRegistry;
use crate::transaction::{LiveObjects, Transaction};

/// Keys of the tagged map that carries a by-value embedded object.
pub(crate) const EMBED_TYPE: &str = "$type";
pub(crate) const EMBED_SCHEMA: &str = "$schema";
pub(crate) const EMBED_STATE: &str = "$state";

pub(crate) struct Depositor<'a> {
    registry: &'a TypeRegistry,
    archive: &'a dyn Archive,
    live: &'a LiveObjects,
    txn: &'a mut Transaction,
    created_by: Value,
}

impl<'a> Depositor<'a> {
    pub(crate) fn new(
        registry: &'a TypeRegistry,
        archive: &'a dyn Archive,
        live: &'a LiveObjects,
        txn: &'a mut Transaction,
        created_by: Value,
    ) -> Self {
        Self {
            registry,
            archive,
            live,
            txn,
            created_by,
        }
    }

    /// Save one object graph root, returning the reference it answers to
    /// after this transaction.
    pub(crate) fn save_object(&mut self, object: AnyObj) -> Result<SnapshotRef> {
        let key = instance_key(&object);
        if let Some(snapshot) = self.txn.finished_ref(key) {
            return Ok(snapshot);
        }
        if let Some(snapshot) = self.txn.in_progress_ref(key) {
            // Reference cycle: hand out the reference registered below.
            trace!(%snapshot, "cycle back-edge during save");
            return Ok(snapshot);
        }

        let helper = self.registry.resolve_any(&object)?;
        let prior = self.live.record_for_key(key).cloned();

        if let Some(prior) = &prior {
            // Fail before encoding if another writer got there first; the
            // batch append would refuse the record anyway.
            if let Some(latest) = self.archive.latest_version(prior.object_id)? {
                if latest != prior.version {
                    return Err(HistorianError::ConcurrentModification {
                        object_id: prior.object_id,
                        known: prior.version,
                        latest,
                    });
                }
            }
        }

        let builder = match &prior {
            Some(record) => RecordBuilder::child_of(record, helper.schema_version()),
            None => {
                RecordBuilder::new(ObjectId::new(), helper.type_id(), helper.schema_version())
                    .extra(extras::CREATED_BY, self.created_by.clone())
            }
        };

        // Cycle back-edges embed the last committed reference, so an
        // unchanged cycle reproduces its stored states exactly and the whole
        // component stays elided. Only a first save, which has no committed
        // version yet, hands out the version being written; a first save
        // always stages.
        let back_edge = match &prior {
            Some(record) => record.snapshot_ref(),
            None => builder.snapshot_ref(),
        };
        self.txn.mark_in_progress(key, back_edge);
        let state = helper.encode_any(&object, self)?;
        self.txn.clear_in_progress(key);

        let record = builder.state(state).build();

        if let Some(prior) = &prior {
            if prior.content_hash == record.content_hash {
                // Unchanged: nothing to stage, the old reference stands.
                let existing = prior.snapshot_ref();
                trace!(%existing, "state unchanged, save elided");
                self.txn.mark_finished(key, existing);
                return Ok(existing);
            }
        }

        let snapshot = record.snapshot_ref();
        debug!(record = %record, "staging snapshot");
        self.txn.mark_finished(key, snapshot);
        self.txn.track_on_commit(object, record.clone());
        self.txn.stage(record);
        Ok(snapshot)
    }
}

impl Saver for Depositor<'_> {
    fn save_ref_any(&mut self, object: AnyObj) -> Result<SnapshotRef> {
        self.save_object(object)
    }

    fn encode_value_any(&mut self, object: AnyObj) -> Result<Value> {
        let helper = self.registry.resolve_any(&object)?;
        let key = instance_key(&object);
        if !self.txn.enter_value(key) {
            return Err(HistorianError::CyclicValueEmbedding {
                type_name: helper.type_name().to_string(),
            });
        }
        let state = helper.encode_any(&object, self);
        self.txn.exit_value(key);
        Ok(Value::map([
            (EMBED_TYPE, Value::from(helper.type_id().as_str())),
            (EMBED_SCHEMA, Value::from(helper.schema_version())),
            (EMBED_STATE, state?),
        ]))
    }
}
