//! The contract a type signs to become storable.
//!
//! A [`Helper`] knows how to turn one Rust type into an encoded [`Value`] and
//! back. Decoding is two-phase: the historian first asks for a [`blank`]
//! instance, registers its handle, and only then asks the helper to
//! [`restore`] state into it. That ordering is what lets reference cycles
//! load: by the time any inner `load_ref` comes back around to the object
//! being restored, its handle already exists.
//!
//! [`blank`]: Helper::blank
//! [`restore`]: Helper::restore

use std::sync::Arc;

use keepsake_types::{SnapshotRef, TypeId, Value};

use crate::error::{HistorianError, Result};
use crate::handle::{downcast, erase, AnyObj, Obj};
use crate::migration::Migration;

/// Encodes and decodes one Rust type.
pub trait Helper: Send + Sync + 'static {
    /// The Rust type this helper is for.
    type Object: Send + Sync + 'static;

    /// The stable identifier written into every record of this type.
    fn type_id(&self) -> TypeId;

    /// The schema version [`encode`](Self::encode) currently produces.
    fn schema_version(&self) -> u32 {
        0
    }

    /// The upgrade steps from older schema versions, one per version bump.
    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        Vec::new()
    }

    /// Encode the object's state. Contained storable objects are handed to
    /// the saver, either by reference (own record, shared identity) or by
    /// value (inlined into this state).
    fn encode(&self, object: &Self::Object, saver: &mut dyn Saver) -> Result<Value>;

    /// A blank instance for two-phase decoding to restore into.
    fn blank(&self) -> Self::Object;

    /// Restore encoded state into a blank instance.
    fn restore(&self, object: &mut Self::Object, state: &Value, loader: &mut dyn Loader)
        -> Result<()>;
}

/// What a helper may ask of the historian while encoding.
pub trait Saver {
    /// Save a contained object as its own record; returns the reference to
    /// embed in the parent's state.
    fn save_ref_any(&mut self, object: AnyObj) -> Result<SnapshotRef>;

    /// Encode a contained object by value, inline in the parent's state.
    fn encode_value_any(&mut self, object: AnyObj) -> Result<Value>;
}

impl dyn Saver + '_ {
    /// Typed form of [`Saver::save_ref_any`].
    pub fn save_ref<T: Send + Sync + 'static>(&mut self, object: &Obj<T>) -> Result<SnapshotRef> {
        self.save_ref_any(erase(object))
    }

    /// Typed form of [`Saver::encode_value_any`].
    pub fn encode_obj_value<T: Send + Sync + 'static>(&mut self, object: &Obj<T>) -> Result<Value> {
        self.encode_value_any(erase(object))
    }
}

/// What a helper may ask of the historian while decoding.
pub trait Loader {
    /// Resolve a stored reference to a live (or pinned) handle.
    fn load_ref_any(&mut self, snapshot: SnapshotRef) -> Result<AnyObj>;

    /// Decode a by-value embedded object out of the parent's state.
    fn decode_value_any(&mut self, value: &Value) -> Result<AnyObj>;
}

impl dyn Loader + '_ {
    /// Typed form of [`Loader::load_ref_any`].
    pub fn load_ref<T: Send + Sync + 'static>(&mut self, snapshot: SnapshotRef) -> Result<Obj<T>> {
        let any = self.load_ref_any(snapshot)?;
        downcast::<T>(&any).ok_or_else(|| HistorianError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
        })
    }

    /// Typed form of [`Loader::decode_value_any`].
    pub fn decode_obj_value<T: Send + Sync + 'static>(&mut self, value: &Value) -> Result<Obj<T>> {
        let any = self.decode_value_any(value)?;
        downcast::<T>(&any).ok_or_else(|| HistorianError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
        })
    }
}
