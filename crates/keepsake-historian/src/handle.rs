//! Shared handles to in-memory objects.
//!
//! Saved objects live behind `Arc<RwLock<T>>` so that the historian and the
//! caller can both hold them, and so that loading the same object twice hands
//! back literally the same instance. The type-erased form [`AnyObj`] is what
//! flows through the identity map and the erased helper layer; the concrete
//! type behind the `dyn Any` is always the `RwLock<T>`, which is what makes
//! [`downcast`] recover the typed handle.

use std::any::Any;
use std::sync::{Arc, RwLock};

/// A shared, lockable handle to a live object.
pub type Obj<T> = Arc<RwLock<T>>;

/// A type-erased [`Obj`]. The erased type is the `RwLock<T>` itself.
pub type AnyObj = Arc<dyn Any + Send + Sync>;

/// Wrap a value in a fresh shared handle.
pub fn new_obj<T>(value: T) -> Obj<T> {
    Arc::new(RwLock::new(value))
}

/// Erase the element type of a handle.
pub fn erase<T: Send + Sync + 'static>(obj: &Obj<T>) -> AnyObj {
    let any: AnyObj = obj.clone();
    any
}

/// Recover the typed handle, if the erased one holds a `T`.
pub fn downcast<T: Send + Sync + 'static>(any: &AnyObj) -> Option<Obj<T>> {
    any.clone().downcast::<RwLock<T>>().ok()
}

/// A key identifying one live instance: the address of its shared allocation.
///
/// Stable for as long as any `Arc` clone is alive, which the identity map
/// guarantees by holding one itself.
pub fn instance_key(any: &AnyObj) -> usize {
    Arc::as_ptr(any).cast::<()>() as usize
}
