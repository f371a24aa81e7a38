//! Sly data: the side-band key/value bag carried alongside a query.
//!
//! Values never enter the natural-language channel. Each hop gets a
//! copy-on-write snapshot; a child's writes travel back as a [`SlyDelta`]
//! that the parent applies when the child's result is aggregated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlyData(Arc<BTreeMap<String, Value>>);

impl SlyData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a value, cloning the underlying map only if it is shared.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        Arc::make_mut(&mut self.0).insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if !self.0.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.0).remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys starting with `prefix`, prefix stripped.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.0
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(move |(k, v)| (&k[prefix.len()..], v))
    }

    /// True when both views still point at the same underlying map.
    pub fn shares_storage_with(&self, other: &SlyData) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Changes that turn `base` into `self`.
    pub fn diff(&self, base: &SlyData) -> SlyDelta {
        if self.shares_storage_with(base) {
            return SlyDelta::default();
        }
        let mut changes = Vec::new();
        for (k, v) in self.0.iter() {
            if base.0.get(k) != Some(v) {
                changes.push((k.clone(), Some(v.clone())));
            }
        }
        for k in base.0.keys() {
            if !self.0.contains_key(k) {
                changes.push((k.clone(), None));
            }
        }
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        SlyDelta { changes }
    }

    /// Apply a delta. Later applications win on the same key.
    pub fn apply(&mut self, delta: &SlyDelta) {
        if delta.is_empty() {
            return;
        }
        let map = Arc::make_mut(&mut self.0);
        for (k, v) in &delta.changes {
            match v {
                Some(v) => {
                    map.insert(k.clone(), v.clone());
                }
                None => {
                    map.remove(k);
                }
            }
        }
    }
}

impl FromIterator<(String, Value)> for SlyData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

/// The writes one hop made to its snapshot. `None` marks a removal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlyDelta {
    pub changes: Vec<(String, Option<Value>)>,
}

impl SlyDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn touched_keys(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|(k, _)| k.as_str())
    }
}
