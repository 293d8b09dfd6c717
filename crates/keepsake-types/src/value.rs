//! The encoded state tree.
//!
//! [`Value`] is the shape every saved object is reduced to before it reaches
//! the archive: a tree of primitives, lists, string-keyed maps, and
//! [`SnapshotRef`] leaves standing in for by-reference fields. Maps are
//! `BTreeMap`s so the tree has a single canonical form regardless of the
//! order fields were inserted in — content hashing depends on this.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::SnapshotRef;

/// One node of an encoded state tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// IEEE 754 double.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered sequence of values.
    List(Vec<Value>),
    /// String-keyed map, canonically ordered.
    Map(BTreeMap<String, Value>),
    /// Reference to another object's snapshot.
    Ref(SnapshotRef),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Build a list value.
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Returns `true` for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Map entry lookup. Returns `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// List element lookup. Returns `None` for non-lists and out-of-range.
    pub fn at(&self, index: usize) -> Option<&Value> {
        match self {
            Self::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_snapshot_ref(&self) -> Option<SnapshotRef> {
        match self {
            Self::Ref(sref) => Some(*sref),
            _ => None,
        }
    }

    /// All snapshot references contained anywhere in this tree, in
    /// depth-first order.
    pub fn references(&self) -> Vec<SnapshotRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, out: &mut Vec<SnapshotRef>) {
        match self {
            Self::Ref(sref) => out.push(*sref),
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<SnapshotRef> for Value {
    fn from(sref: SnapshotRef) -> Self {
        Self::Ref(sref)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}
