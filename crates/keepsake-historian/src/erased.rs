//! Object-safe adapter over [`Helper`].
//!
//! The registry stores helpers type-erased; [`Erased`] bridges the generic
//! [`Helper`] trait to [`ErasedHelper`] by downcasting handles and taking the
//! appropriate lock around encode and restore.

use std::any;
use std::sync::Arc;

use keepsake_types::{TypeId, Value};

use crate::error::{HistorianError, Result};
use crate::handle::{downcast, erase, new_obj, AnyObj};
use crate::helper::{Helper, Loader, Saver};
use crate::migration::Migration;

/// A type-erased [`Helper`].
pub trait ErasedHelper: Send + Sync {
    fn type_id(&self) -> TypeId;
    fn schema_version(&self) -> u32;
    fn migrations(&self) -> Vec<Arc<dyn Migration>>;

    /// The `TypeId` of the helped type `T`.
    fn runtime_type(&self) -> any::TypeId;

    /// The `TypeId` of `RwLock<T>`, the concrete type behind an [`AnyObj`].
    fn lock_type(&self) -> any::TypeId;

    /// The Rust name of the helped type, for error messages.
    fn type_name(&self) -> &'static str;

    /// A fresh blank instance, already wrapped in a shared handle.
    fn new_blank(&self) -> AnyObj;

    fn encode_any(&self, object: &AnyObj, saver: &mut dyn Saver) -> Result<Value>;

    fn restore_any(&self, object: &AnyObj, state: &Value, loader: &mut dyn Loader) -> Result<()>;
}

/// Wraps a concrete helper into the erased interface.
pub struct Erased<H: Helper> {
    helper: H,
}

impl<H: Helper> Erased<H> {
    pub fn new(helper: H) -> Self {
        Self { helper }
    }

    fn typed(&self, object: &AnyObj) -> Result<crate::handle::Obj<H::Object>> {
        downcast::<H::Object>(object).ok_or_else(|| HistorianError::TypeMismatch {
            expected: any::type_name::<H::Object>().to_string(),
        })
    }
}

impl<H: Helper> ErasedHelper for Erased<H> {
    fn type_id(&self) -> TypeId {
        self.helper.type_id()
    }

    fn schema_version(&self) -> u32 {
        self.helper.schema_version()
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        self.helper.migrations()
    }

    fn runtime_type(&self) -> any::TypeId {
        any::TypeId::of::<H::Object>()
    }

    fn lock_type(&self) -> any::TypeId {
        any::TypeId::of::<std::sync::RwLock<H::Object>>()
    }

    fn type_name(&self) -> &'static str {
        any::type_name::<H::Object>()
    }

    fn new_blank(&self) -> AnyObj {
        erase(&new_obj(self.helper.blank()))
    }

    fn encode_any(&self, object: &AnyObj, saver: &mut dyn Saver) -> Result<Value> {
        let obj = self.typed(object)?;
        let guard = obj
            .read()
            .map_err(|_| HistorianError::Poisoned(self.type_name().to_string()))?;
        self.helper.encode(&guard, saver)
    }

    fn restore_any(&self, object: &AnyObj, state: &Value, loader: &mut dyn Loader) -> Result<()> {
        let obj = self.typed(object)?;
        let mut guard = obj
            .write()
            .map_err(|_| HistorianError::Poisoned(self.type_name().to_string()))?;
        self.helper.restore(&mut guard, state, loader)
    }
}
