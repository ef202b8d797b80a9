//! In-memory settings backend for tests.

use super::SettingsBackend;
use crate::error::{SyncError, SyncResult};
use crate::lock;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Settings kept in memory.
///
/// Clones share the same contents, so a test can hand one clone to the
/// engine and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsBackend {
    inner: Arc<Mutex<MemorySettingsInner>>,
}

#[derive(Debug, Default)]
struct MemorySettingsInner {
    values: BTreeMap<String, String>,
    saves: usize,
    fail_next_save: Option<String>,
}

impl MemorySettingsBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the saved map.
    pub fn values(&self) -> BTreeMap<String, String> {
        lock(&self.inner).values.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        lock(&self.inner).saves
    }

    /// Cause the next save() to fail with the given error.
    pub fn fail_next_save(&self, error: &str) {
        lock(&self.inner).fail_next_save = Some(error.to_string());
    }
}

#[async_trait]
impl SettingsBackend for MemorySettingsBackend {
    async fn load(&self) -> SyncResult<BTreeMap<String, String>> {
        Ok(lock(&self.inner).values.clone())
    }

    async fn save(&self, values: &BTreeMap<String, String>) -> SyncResult<()> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_save.take() {
            return Err(SyncError::Settings(error));
        }
        inner.values = values.clone();
        inner.saves += 1;
        Ok(())
    }
}
