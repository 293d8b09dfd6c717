//! Field-equality queries over latest records.
//!
//! Deliberately small: an optional type filter, equality on top-level state
//! fields, equality on extras entries, and a result limit. Anything richer
//! belongs to the backing database, not this boundary.

use keepsake_record::DataRecord;
use keepsake_types::{TypeId, Value};

/// A description of which latest records to return.
#[derive(Clone, Debug, Default)]
pub struct Query {
    type_id: Option<TypeId>,
    state_eq: Vec<(String, Value)>,
    extras_eq: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl Query {
    /// An empty query matching every live object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to records of one type.
    pub fn with_type(mut self, type_id: TypeId) -> Self {
        self.type_id = Some(type_id);
        self
    }

    /// Require a top-level state field to equal a value.
    pub fn with_state_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.state_eq.push((field.into(), value));
        self
    }

    /// Require an extras entry to equal a value.
    pub fn with_extra_eq(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras_eq.push((key.into(), value));
        self
    }

    /// Cap the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The result cap, if any.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Does this record satisfy every predicate?
    ///
    /// Tombstones never match: a deleted object is invisible to queries.
    pub fn matches(&self, record: &DataRecord) -> bool {
        if record.is_deleted() {
            return false;
        }
        if let Some(type_id) = &self.type_id {
            if &record.type_id != type_id {
                return false;
            }
        }
        for (field, expected) in &self.state_eq {
            let actual = record.state_value().and_then(|state| state.get(field));
            if actual != Some(expected) {
                return false;
            }
        }
        for (key, expected) in &self.extras_eq {
            if record.extra(key) != Some(expected) {
                return false;
            }
        }
        true
    }
}
