//! The type registry: type ids to helpers, Rust types to helpers.
//!
//! Helpers are looked up three ways: by the Rust type parameter at typed call
//! sites, by the runtime type behind an [`AnyObj`] inside the save walk, and
//! by stored type id when decoding. The registry indexes each helper under
//! both `T` and `RwLock<T>` so the second lookup works directly off the
//! erased handle.

use std::any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use keepsake_types::TypeId;

use crate::erased::{Erased, ErasedHelper};
use crate::error::{HistorianError, Result};
use crate::handle::AnyObj;
use crate::helper::Helper;

#[derive(Default)]
struct Inner {
    by_runtime: HashMap<any::TypeId, Arc<dyn ErasedHelper>>,
    by_id: HashMap<TypeId, Arc<dyn ErasedHelper>>,
}

/// Registered helpers, indexed by Rust type and by type id.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<Inner>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a helper. The same helper may be registered again, but a
    /// type id may never be claimed by two different Rust types.
    pub fn register<H: Helper>(&self, helper: H) -> Result<()> {
        let erased: Arc<dyn ErasedHelper> = Arc::new(Erased::new(helper));
        let mut inner = self
            .inner
            .write()
            .map_err(|_| HistorianError::Poisoned("type registry".into()))?;
        let type_id = erased.type_id();
        if let Some(existing) = inner.by_id.get(&type_id) {
            if existing.runtime_type() != erased.runtime_type() {
                return Err(HistorianError::DuplicateTypeId { type_id });
            }
        }
        inner.by_runtime.insert(erased.runtime_type(), erased.clone());
        inner.by_runtime.insert(erased.lock_type(), erased.clone());
        inner.by_id.insert(type_id, erased);
        Ok(())
    }

    /// The helper for Rust type `T`.
    pub fn resolve<T: 'static>(&self) -> Result<Arc<dyn ErasedHelper>> {
        self.lookup_runtime(any::TypeId::of::<T>())
            .ok_or_else(|| HistorianError::UnregisteredType {
                type_name: any::type_name::<T>().to_string(),
            })
    }

    /// The helper for the object behind an erased handle.
    pub fn resolve_any(&self, any: &AnyObj) -> Result<Arc<dyn ErasedHelper>> {
        self.lookup_runtime((**any).type_id())
            .ok_or_else(|| HistorianError::UnregisteredType {
                type_name: "<erased>".to_string(),
            })
    }

    /// The helper claiming a stored type id.
    pub fn resolve_by_id(&self, type_id: &TypeId) -> Result<Arc<dyn ErasedHelper>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| HistorianError::Poisoned("type registry".into()))?;
        inner
            .by_id
            .get(type_id)
            .cloned()
            .ok_or_else(|| HistorianError::UnregisteredTypeId {
                type_id: type_id.clone(),
            })
    }

    fn lookup_runtime(&self, key: any::TypeId) -> Option<Arc<dyn ErasedHelper>> {
        self.inner.read().ok()?.by_runtime.get(&key).cloned()
    }
}
