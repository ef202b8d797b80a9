//! TOML file settings backend.

use super::SettingsBackend;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings stored in a TOML file.
///
/// Saves write a sibling temporary file and rename it over the old one,
/// so a crash mid-save leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileSettingsBackend {
    path: PathBuf,
}

impl FileSettingsBackend {
    /// Create a backend for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backend for an account's ledger inside a directory.
    pub fn for_account(dir: &Path, account: &str) -> Self {
        Self::new(dir.join(format!("{}.sync.toml", account)))
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SettingsBackend for FileSettingsBackend {
    async fn load(&self) -> SyncResult<BTreeMap<String, String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(SyncError::Settings(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        toml::from_str(&contents).map_err(|e| {
            SyncError::Settings(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, values: &BTreeMap<String, String>) -> SyncResult<()> {
        let contents = toml::to_string(values)
            .map_err(|e| SyncError::Settings(format!("failed to encode settings: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SyncError::Settings(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, contents).await.map_err(|e| {
            SyncError::Settings(format!("failed to write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            SyncError::Settings(format!("failed to replace {}: {}", self.path.display(), e))
        })?;

        tracing::debug!(path = %self.path.display(), keys = values.len(), "Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let backend = FileSettingsBackend::new(dir.path().join("nope.toml"));
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_keeps_slashed_keys() {
        let dir = TempDir::new().unwrap();
        let backend = FileSettingsBackend::for_account(dir.path(), "alice");

        let mut values = BTreeMap::new();
        values.insert("own/lastSyncData/tags/expungedGuids/1/guid".to_string(), "g1".to_string());
        values.insert("own/lastSyncData/updateCount".to_string(), "42".to_string());
        backend.save(&values).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), values);
        assert!(!backend.temp_path().exists());
    }

    #[tokio::test]
    async fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let backend = FileSettingsBackend::new(dir.path().join("nested/deeper/ledger.toml"));
        backend.save(&BTreeMap::new()).await.unwrap();
        assert!(backend.path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_settings_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let err = FileSettingsBackend::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SyncError::Settings(_)));
    }
}
