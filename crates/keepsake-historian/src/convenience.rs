//! Ergonomic extension methods on object handles.

use keepsake_types::SnapshotRef;

use crate::error::Result;
use crate::handle::Obj;
use crate::historian::Historian;

/// `object.save(&historian)` as an alternative to `historian.save(&object)`.
pub trait SaveExt {
    fn save(&self, historian: &Historian) -> Result<SnapshotRef>;
}

impl<T: Send + Sync + 'static> SaveExt for Obj<T> {
    fn save(&self, historian: &Historian) -> Result<SnapshotRef> {
        historian.save(self)
    }
}
