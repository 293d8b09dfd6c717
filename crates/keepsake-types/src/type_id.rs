use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier binding stored records to a type helper.
///
/// A `TypeId` is published once per application type (e.g. `"garage.car"`)
/// and must never change afterwards: every record carries the id of the
/// helper that encoded it, and renaming the id orphans all existing records
/// of that type. It deliberately has no relation to [`std::any::TypeId`],
/// which is not stable across builds.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(String);

impl TypeId {
    /// Create a type id from its stable string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The string form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
