//! Track Dictionary
//!
//! Per-track side channel used by filters to signal each other
//! ("seek_time", "error", "input", ...). Entries are kept in an ordered map
//! keyed by a 64-bit hash of the name. A hash hit is only trusted after the
//! full name compares equal, so two names sharing a hash can never read
//! each other's value.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrackError};

/// Hash function used to key entries
pub type NameHasher = fn(&str) -> u64;

/// A dictionary value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DictValue {
    Int(i64),
    Str(String),
}

impl DictValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DictValue::Int(v) => Some(*v),
            DictValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DictValue::Str(s) => Some(s),
            DictValue::Int(_) => None,
        }
    }
}

impl fmt::Display for DictValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictValue::Int(v) => write!(f, "{}", v),
            DictValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for DictValue {
    fn from(v: i64) -> Self {
        DictValue::Int(v)
    }
}

impl From<&str> for DictValue {
    fn from(v: &str) -> Self {
        DictValue::Str(v.to_string())
    }
}

impl From<String> for DictValue {
    fn from(v: String) -> Self {
        DictValue::Str(v)
    }
}

#[derive(Debug, Clone)]
struct DictEntry {
    name: String,
    value: DictValue,
}

/// Key/value store owned by one track
#[derive(Debug, Clone)]
pub struct TrackDict {
    entries: BTreeMap<u64, DictEntry>,
    case_folded: bool,
    hasher: NameHasher,
}

fn default_hash(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

impl TrackDict {
    /// Create a dictionary with case-sensitive names
    pub fn new() -> Self {
        Self::with_hasher(default_hash, false)
    }

    /// Create a dictionary whose names compare ASCII case-insensitively
    pub fn case_folded() -> Self {
        Self::with_hasher(default_hash, true)
    }

    /// Create a dictionary with a custom hash function
    pub fn with_hasher(hasher: NameHasher, case_folded: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            case_folded,
            hasher,
        }
    }

    fn key(&self, name: &str) -> u64 {
        if self.case_folded {
            (self.hasher)(&name.to_ascii_lowercase())
        } else {
            (self.hasher)(name)
        }
    }

    fn same_name(&self, a: &str, b: &str) -> bool {
        if self.case_folded {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn find(&self, name: &str) -> Option<&DictEntry> {
        let entry = self.entries.get(&self.key(name))?;
        if !self.same_name(&entry.name, name) {
            return None;
        }
        Some(entry)
    }

    /// Insert or overwrite; returns whether an entry already existed
    fn put(&mut self, name: &str, value: DictValue, overwrite: bool) -> Result<bool> {
        let key = self.key(name);
        let case_folded = self.case_folded;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                let same = if case_folded {
                    entry.name.eq_ignore_ascii_case(name)
                } else {
                    entry.name == name
                };
                if !same {
                    return Err(TrackError::DictCollision {
                        name: name.to_string(),
                        existing: entry.name.clone(),
                    });
                }
                if overwrite {
                    debug!(key = name, old = %entry.value, new = %value, "setval: overwrite");
                    entry.value = value;
                }
                Ok(true)
            }
            None => {
                debug!(key = name, value = %value, "setval");
                self.entries.insert(
                    key,
                    DictEntry {
                        name: name.to_string(),
                        value,
                    },
                );
                Ok(false)
            }
        }
    }

    /// Set an integer value, overwriting any previous value
    pub fn set(&mut self, name: &str, value: i64) -> Result<()> {
        self.put(name, DictValue::Int(value), true).map(|_| ())
    }

    /// Set a string value, overwriting any previous value
    pub fn set_str(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        self.put(name, DictValue::Str(value.into()), true)
            .map(|_| ())
    }

    /// Set any value, overwriting any previous value
    pub fn set_value(&mut self, name: &str, value: DictValue) -> Result<()> {
        self.put(name, value, true).map(|_| ())
    }

    /// Set a value only if the name is not present yet.
    ///
    /// Returns `true` if the value was stored.
    pub fn set_if_absent(&mut self, name: &str, value: DictValue) -> Result<bool> {
        self.put(name, value, false).map(|existed| !existed)
    }

    /// Get a value by name
    pub fn get(&self, name: &str) -> Option<&DictValue> {
        self.find(name).map(|e| &e.value)
    }

    /// Get an integer value by name
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(DictValue::as_int)
    }

    /// Get a string value by name
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(DictValue::as_str)
    }

    /// Remove and return a value (one-shot signals such as "seek_time")
    pub fn pop(&mut self, name: &str) -> Option<DictValue> {
        self.find(name)?;
        let key = self.key(name);
        self.entries.remove(&key).map(|e| e.value)
    }

    /// Remove an entry; returns whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        self.pop(name).is_some()
    }

    /// Remove and return an integer value
    pub fn pop_int(&mut self, name: &str) -> Option<i64> {
        match self.get(name)? {
            DictValue::Int(_) => self.pop(name).and_then(|v| v.as_int()),
            DictValue::Str(_) => None,
        }
    }

    /// Check whether a name is present
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DictValue)> {
        self.entries.values().map(|e| (e.name.as_str(), &e.value))
    }

    /// Copy all entries into a name-sorted list
    pub fn snapshot(&self) -> Vec<(String, DictValue)> {
        let mut items: Vec<(String, DictValue)> = self
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for TrackDict {
    fn default() -> Self {
        Self::new()
    }
}
