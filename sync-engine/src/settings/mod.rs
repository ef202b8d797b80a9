//! Grouped key-value settings used to persist sync ledgers.
//!
//! [`Settings`] is an in-memory view over a flat `key → value` map with
//! slash-separated keys. Groups and arrays only change the prefix new keys
//! are read from and written to:
//!
//! ```text
//! begin_group("lastSyncData")
//!   begin_write_array("expungedGuids")
//!     set_array_index(0); set_value("guid", "g1")   → lastSyncData/expungedGuids/1/guid
//!   end_array()                                     → lastSyncData/expungedGuids/size = 1
//! end_group()
//! ```
//!
//! A [`SettingsBackend`] loads and saves the flat map as a whole.

mod file;
mod memory;

pub use file::FileSettingsBackend;
pub use memory::MemorySettingsBackend;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::SyncResult;

/// Durable storage of a flat settings map.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Load the whole map (empty if nothing was saved yet).
    async fn load(&self) -> SyncResult<BTreeMap<String, String>>;

    /// Replace the stored map.
    ///
    /// Implementations must never leave a half-written map behind.
    async fn save(&self, values: &BTreeMap<String, String>) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
enum Segment {
    Group(String),
    Array {
        name: String,
        index: Option<usize>,
        size: usize,
        writing: bool,
    },
}

/// Grouped view over a flat settings map.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: BTreeMap<String, String>,
    segments: Vec<Segment>,
}

impl Settings {
    /// Create empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a loaded map.
    pub fn from_map(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            segments: Vec::new(),
        }
    }

    /// The flat map.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Enter a group.
    pub fn begin_group(&mut self, name: &str) {
        self.segments.push(Segment::Group(name.to_string()));
    }

    /// Leave the innermost group.
    pub fn end_group(&mut self) {
        if matches!(self.segments.last(), Some(Segment::Group(_))) {
            self.segments.pop();
        }
    }

    /// Start writing an array, replacing any previous contents.
    pub fn begin_write_array(&mut self, name: &str) {
        let full = format!("{}{}", self.prefix(), name);
        self.remove_prefixed(&full);
        self.segments.push(Segment::Array {
            name: name.to_string(),
            index: None,
            size: 0,
            writing: true,
        });
    }

    /// Start reading an array; returns its size.
    pub fn begin_read_array(&mut self, name: &str) -> usize {
        let size = self
            .value(&format!("{}/size", name))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        self.segments.push(Segment::Array {
            name: name.to_string(),
            index: None,
            size,
            writing: false,
        });
        size
    }

    /// Select the array element subsequent keys refer to.
    pub fn set_array_index(&mut self, i: usize) {
        if let Some(Segment::Array { index, size, writing, .. }) = self.segments.last_mut() {
            *index = Some(i);
            if *writing && i + 1 > *size {
                *size = i + 1;
            }
        }
    }

    /// Finish the innermost array; a written array records its size.
    pub fn end_array(&mut self) {
        if !matches!(self.segments.last(), Some(Segment::Array { .. })) {
            return;
        }
        if let Some(Segment::Array {
            name,
            size,
            writing: true,
            ..
        }) = self.segments.pop()
        {
            self.set_value(&format!("{}/size", name), size);
        }
    }

    /// Read a value relative to the current group.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .get(&format!("{}{}", self.prefix(), key))
            .map(String::as_str)
    }

    /// Write a value relative to the current group.
    pub fn set_value(&mut self, key: &str, value: impl ToString) {
        let full = format!("{}{}", self.prefix(), key);
        self.values.insert(full, value.to_string());
    }

    /// Whether a key or group exists relative to the current group.
    pub fn contains(&self, key: &str) -> bool {
        let full = format!("{}{}", self.prefix(), key);
        let nested = format!("{}/", full);
        self.values.contains_key(&full)
            || self
                .values
                .range(nested.clone()..)
                .next()
                .is_some_and(|(k, _)| k.starts_with(&nested))
    }

    /// Remove a key and everything grouped below it.
    pub fn remove(&mut self, key: &str) {
        let full = format!("{}{}", self.prefix(), key);
        self.values.remove(&full);
        self.remove_prefixed(&full);
    }

    /// Names of the groups directly below the current group.
    pub fn child_groups(&self) -> Vec<String> {
        let prefix = self.prefix();
        let groups: BTreeSet<String> = self
            .values
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split_once('/').map(|(group, _)| group.to_string()))
            .collect();
        groups.into_iter().collect()
    }

    fn remove_prefixed(&mut self, key: &str) {
        let nested = format!("{}/", key);
        self.values.retain(|k, _| !k.starts_with(&nested));
    }

    fn prefix(&self) -> String {
        let mut prefix = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Group(name) => {
                    prefix.push_str(name);
                    prefix.push('/');
                }
                Segment::Array { name, index, .. } => {
                    prefix.push_str(name);
                    prefix.push('/');
                    if let Some(i) = index {
                        prefix.push_str(&(i + 1).to_string());
                        prefix.push('/');
                    }
                }
            }
        }
        prefix
    }
}
