//! The persistence boundary of keepsake.
//!
//! The historian never talks to a database directly; it talks to an
//! [`Archive`]. The one primitive an archive must provide atomically is the
//! compare-and-swap append: "insert this record at version `latest + 1`,
//! failing if another writer got there first". That single point serializes
//! concurrent writers — everything else (reads, history, queries) is safe on
//! immutable records.
//!
//! # Modules
//!
//! - [`error`] — [`ArchiveError`] and the crate [`Result`] alias
//! - [`traits`] — The [`Archive`] trait
//! - [`query`] — Field-equality [`Query`] descriptions
//! - [`memory`] — [`InMemoryArchive`] for tests and embedding

pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use error::{ArchiveError, Result};
pub use memory::InMemoryArchive;
pub use query::Query;
pub use traits::Archive;
