//! In-memory data model: layouts, key paths, collections and snapshots.

use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A record is any JSON value. The store enforces no schema.
pub type Record = Value;

/// Key-path depth of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Records keyed directly, e.g. by user id: `[key]`.
    #[default]
    Flat,
    /// Records keyed by scope then key, e.g. guild id then user id: `[scope, key]`.
    Scoped,
}

impl Layout {
    /// Number of segments a key path must have in this layout.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Flat => 1,
            Self::Scoped => 2,
        }
    }

    /// Rejects key paths of the wrong depth or with empty segments.
    pub fn check(self, collection: &str, path: &KeyPath) -> Result<()> {
        let reason = if path.len() != self.depth() {
            Some(format!(
                "expected {} segment(s), got {}",
                self.depth(),
                path.len()
            ))
        } else if path.segments().iter().any(String::is_empty) {
            Some("segments must not be empty".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(Error::InvalidKeyPath {
                collection: collection.to_string(),
                path: path.segments().to_vec(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Ordered list of string segments identifying a record within a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    #[must_use]
    pub const fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment: the user id, item name, etc.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// First segment of a two-level path.
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        if self.0.len() > 1 {
            self.0.first().map(String::as_str)
        } else {
            None
        }
    }

    #[must_use]
    pub fn starts_with(&self, prefix: &[String]) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for KeyPath {
    fn from(key: &str) -> Self {
        Self(vec![key.to_string()])
    }
}

impl From<String> for KeyPath {
    fn from(key: String) -> Self {
        Self(vec![key])
    }
}

impl From<[&str; 2]> for KeyPath {
    fn from([scope, key]: [&str; 2]) -> Self {
        Self(vec![scope.to_string(), key.to_string()])
    }
}

impl From<(&str, &str)> for KeyPath {
    fn from((scope, key): (&str, &str)) -> Self {
        Self(vec![scope.to_string(), key.to_string()])
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

/// Decoded record set of one collection.
///
/// Equality ignores insertion order: records live in a `BTreeMap` and JSON
/// objects inside records are sorted maps as well.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collection {
    layout: Layout,
    records: BTreeMap<KeyPath, Record>,
}

impl Collection {
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self {
            layout,
            records: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &KeyPath) -> Option<&Record> {
        self.records.get(path)
    }

    /// Inserts without depth validation; callers check the layout first.
    pub(crate) fn insert(&mut self, path: KeyPath, record: Record) -> Option<Record> {
        self.records.insert(path, record)
    }

    pub(crate) fn remove(&mut self, path: &KeyPath) -> Option<Record> {
        self.records.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyPath, &Record)> {
        self.records.iter()
    }

    /// Records whose key path starts with `prefix`, in key order.
    pub fn iter_prefix<'a>(
        &'a self,
        prefix: &'a [String],
    ) -> impl Iterator<Item = (&'a KeyPath, &'a Record)> + 'a {
        self.records
            .range(KeyPath(prefix.to_vec())..)
            .take_while(move |(path, _)| path.starts_with(prefix))
    }
}

/// Published in-memory state of one collection.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub collection: Collection,
    pub revision: u64,
    /// Set on a working copy once it diverges from what is on disk.
    pub dirty: bool,
    pub loaded_at: DateTime<Utc>,
}

impl Snapshot {
    #[must_use]
    pub fn new(collection: Collection, revision: u64) -> Self {
        Self {
            collection,
            revision,
            dirty: false,
            loaded_at: Utc::now(),
        }
    }
}
