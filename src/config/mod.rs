//! Configuration snapshots and their store-assigned versions.
//!
//! A [`ConfigSnapshot`] is one complete configuration: an immutable mapping
//! from string keys to string values. Mutation builds a new snapshot, so a
//! snapshot handed to `store_config` can never drift from the version it was
//! loaded against. [`Version`] is the store's modification revision, opaque
//! and totally ordered; [`LoadedConfig`] pins the two together.

pub mod codec;

pub use codec::{CodecError, CodecResult};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An opaque, totally ordered configuration version.
///
/// Assigned by the backing store on every committed write. Comparable only
/// for equality and ordering; the numeric gap between two versions carries no
/// meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(i64);

impl Version {
    /// The ordering-minimal sentinel for a configuration that has never been
    /// written. Using it as a write guard asserts create-if-absent.
    pub const ABSENT: Version = Version(0);

    pub(crate) fn from_revision(revision: i64) -> Self {
        Version(revision)
    }

    pub(crate) fn as_revision(self) -> i64 {
        self.0
    }

    /// Whether this is the absent sentinel.
    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One complete configuration: an immutable key-to-value mapping.
///
/// Keys are kept sorted so that encoding is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    entries: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        ConfigSnapshot {
            entries: BTreeMap::new(),
        }
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns a new snapshot with `key` set to `value`.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> ConfigSnapshot {
        let mut entries = self.entries.clone();
        entries.insert(key.into(), value.into());
        ConfigSnapshot { entries }
    }

    /// Returns a new snapshot without `key`.
    pub fn without(&self, key: &str) -> ConfigSnapshot {
        let mut entries = self.entries.clone();
        entries.remove(key);
        ConfigSnapshot { entries }
    }

    /// Returns this snapshot overlaid on `defaults`: every key present here
    /// wins, every key only in `defaults` falls through.
    pub fn merged_over(&self, defaults: &ConfigSnapshot) -> ConfigSnapshot {
        let mut entries = defaults.entries.clone();
        entries.extend(self.entries.clone());
        ConfigSnapshot { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ConfigSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        ConfigSnapshot {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A snapshot paired with the exact version it was read at (or written as).
///
/// The version is never cached or assumed; it always reflects the store state
/// the snapshot came from, which is what makes it safe to pass back as the
/// optimistic-concurrency guard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedConfig {
    snapshot: ConfigSnapshot,
    version: Version,
}

impl LoadedConfig {
    pub(crate) fn new(snapshot: ConfigSnapshot, version: Version) -> Self {
        LoadedConfig { snapshot, version }
    }

    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Splits into the snapshot and its version.
    pub fn into_parts(self) -> (ConfigSnapshot, Version) {
        (self.snapshot, self.version)
    }
}
