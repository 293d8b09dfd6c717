//! Object versioning over an archive of immutable records.
//!
//! A [`Historian`] turns plain Rust values into versioned, content-addressed
//! records. Each storable type registers a [`Helper`] that encodes it to a
//! [`Value`](keepsake_types::Value) tree and restores it back; the historian
//! handles the rest — identity (one live instance per object id), atomic
//! save walks over whole object graphs, reference cycles, pinned historical
//! loads, deletion tombstones, and schema migration.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use keepsake_historian::{Helper, Historian, Loader, Result, Saver, new_obj};
//! # use keepsake_types::{TypeId, Value};
//! # struct Car { colour: String }
//! # struct CarHelper;
//! # impl Helper for CarHelper {
//! #     type Object = Car;
//! #     fn type_id(&self) -> TypeId { TypeId::new("garage.car") }
//! #     fn encode(&self, car: &Car, _: &mut dyn Saver) -> Result<Value> {
//! #         Ok(Value::map([("colour", Value::from(car.colour.as_str()))]))
//! #     }
//! #     fn blank(&self) -> Car { Car { colour: String::new() } }
//! #     fn restore(&self, car: &mut Car, state: &Value, _: &mut dyn Loader) -> Result<()> {
//! #         car.colour = state.get("colour").and_then(Value::as_text).unwrap_or_default().into();
//! #         Ok(())
//! #     }
//! # }
//! let historian = Historian::in_memory();
//! historian.register_helper(CarHelper)?;
//!
//! let car = new_obj(Car { colour: "red".into() });
//! let snapshot = historian.save(&car)?;
//!
//! car.write().unwrap().colour = "blue".into();
//! historian.save(&car)?;
//!
//! // The red car is still there, pinned at version 0.
//! let red = historian.load_snapshot::<Car>(snapshot)?;
//! # Ok::<(), keepsake_historian::HistorianError>(())
//! ```
//!
//! # Modules
//!
//! - [`handle`] — shared object handles and type erasure
//! - [`helper`] — the [`Helper`] contract and the [`Saver`]/[`Loader`] seams
//! - [`migration`] — schema upgrade steps and chain resolution
//! - [`registry`] — type id and runtime type lookup
//! - [`transaction`] — the identity map and staged transactions
//! - [`historian`] — the façade tying it all together

pub mod convenience;
mod depositor;
pub mod erased;
pub mod error;
pub mod handle;
pub mod helper;
pub mod historian;
mod loader;
pub mod migration;
pub mod registry;
pub mod transaction;

pub use convenience::SaveExt;
pub use erased::ErasedHelper;
pub use error::{HistorianError, Result};
pub use handle::{downcast, erase, new_obj, AnyObj, Obj};
pub use helper::{Helper, Loader, Saver};
pub use historian::Historian;
pub use migration::{Migration, MigrationContext};
pub use registry::TypeRegistry;
pub use transaction::{LiveObjects, Transaction};

pub use keepsake_archive::{Archive, ArchiveError, InMemoryArchive, Query};
pub use keepsake_record::{extras, DataRecord, RecordBuilder, RecordState};
pub use keepsake_types::{ContentHash, ObjectId, SnapshotRef, TypeId, Value};
