//! Schema migration chains.
//!
//! Each [`Migration`] upgrades encoded state by exactly one schema version.
//! A helper at schema version `n` declares migrations targeting versions
//! `1..=n`; loading a record stored at an older version walks the chain in
//! ascending order before restoring. The stored record is untouched by a
//! load; only the explicit migrate operation rewrites the archive.

use std::collections::BTreeMap;
use std::sync::Arc;

use keepsake_types::{SnapshotRef, Value};
use tracing::debug;

use crate::erased::ErasedHelper;
use crate::error::{HistorianError, Result};
use crate::handle::Obj;
use crate::helper::Loader;

/// One step of a schema upgrade: version `target_version - 1` in, version
/// `target_version` out.
pub trait Migration: Send + Sync {
    /// The schema version this step produces.
    fn target_version(&self) -> u32;

    /// Rewrite the encoded state into the target version's shape.
    fn upgrade(&self, state: Value, ctx: &mut MigrationContext<'_>) -> Result<Value>;
}

/// Facilities available to a migration step.
///
/// Migrations may load referenced objects, e.g. to pull a field out of a
/// referent that the new schema inlines.
pub struct MigrationContext<'a> {
    loader: &'a mut dyn Loader,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(loader: &'a mut dyn Loader) -> Self {
        Self { loader }
    }

    /// Resolve a stored reference.
    pub fn load_ref<T: Send + Sync + 'static>(&mut self, snapshot: SnapshotRef) -> Result<Obj<T>> {
        self.loader.load_ref(snapshot)
    }
}

/// The ascending chain of steps taking state from `from` to the helper's
/// current schema version.
///
/// Empty if the state is already current. Fails if `from` is ahead of the
/// helper (state written by newer code) or a step is missing.
pub fn resolve_chain(
    helper: &dyn ErasedHelper,
    from: u32,
) -> Result<Vec<Arc<dyn Migration>>> {
    let current = helper.schema_version();
    if from == current {
        return Ok(Vec::new());
    }
    let broken = || HistorianError::BrokenMigrationChain {
        type_id: helper.type_id(),
        from,
        to: current,
    };
    if from > current {
        return Err(broken());
    }
    let by_target: BTreeMap<u32, Arc<dyn Migration>> = helper
        .migrations()
        .into_iter()
        .map(|m| (m.target_version(), m))
        .collect();
    let mut chain = Vec::with_capacity((current - from) as usize);
    for target in from + 1..=current {
        chain.push(by_target.get(&target).cloned().ok_or_else(broken)?);
    }
    Ok(chain)
}

/// Run the chain, upgrading `state` from schema version `from` to current.
pub fn upgrade_state(
    helper: &dyn ErasedHelper,
    from: u32,
    state: Value,
    loader: &mut dyn Loader,
) -> Result<Value> {
    let chain = resolve_chain(helper, from)?;
    let mut state = state;
    let mut ctx = MigrationContext::new(loader);
    for step in chain {
        debug!(
            type_id = %helper.type_id(),
            target = step.target_version(),
            "applying schema migration"
        );
        state = step.upgrade(state, &mut ctx)?;
    }
    Ok(state)
}
