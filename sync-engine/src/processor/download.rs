//! In-memory full-data downloader for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sync_types::{Guid, Note, Resource, SyncEntity};

use super::FullDataDownloader;
use crate::error::{SyncError, SyncResult};
use crate::lock;

/// Downloader that fills in note bodies and resource data.
///
/// Clones share state, so a test can keep a handle for inspection and
/// failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockDownloader {
    inner: Arc<Mutex<MockDownloaderInner>>,
}

#[derive(Debug, Default)]
struct MockDownloaderInner {
    failures: HashMap<Guid, (String, bool)>,
    rate_limit_all: bool,
    downloaded: Vec<Guid>,
}

impl MockDownloader {
    /// Create a downloader that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next download of `guid` fail.
    pub fn fail_download_of(&self, guid: &str, error: &str) {
        lock(&self.inner)
            .failures
            .insert(Guid::new(guid), (error.to_string(), false));
    }

    /// Make the next download of `guid` fail as rate limited.
    pub fn rate_limit_download_of(&self, guid: &str) {
        lock(&self.inner)
            .failures
            .insert(Guid::new(guid), ("rate limit reached".to_string(), true));
    }

    /// Make every download fail as rate limited until [`clear_failures`](Self::clear_failures).
    pub fn rate_limit_all(&self) {
        lock(&self.inner).rate_limit_all = true;
    }

    /// Drop every pending failure.
    pub fn clear_failures(&self) {
        let mut inner = lock(&self.inner);
        inner.failures.clear();
        inner.rate_limit_all = false;
    }

    /// Guids downloaded successfully, in order.
    pub fn downloaded(&self) -> Vec<Guid> {
        lock(&self.inner).downloaded.clone()
    }

    fn check<K: SyncEntity>(&self, entity: &K) -> SyncResult<()> {
        let Some(guid) = entity.guid() else {
            return Err(SyncError::InvalidArgument(format!(
                "{} has no guid to download",
                entity.describe()
            )));
        };
        let mut inner = lock(&self.inner);
        let failure = match inner.failures.remove(guid) {
            Some(failure) => Some(failure),
            None if inner.rate_limit_all => Some(("rate limit reached".to_string(), true)),
            None => None,
        };
        if let Some((message, rate_limited)) = failure {
            return Err(SyncError::Download {
                guid: guid.clone(),
                message,
                rate_limited,
            });
        }
        inner.downloaded.push(guid.clone());
        Ok(())
    }
}

#[async_trait]
impl FullDataDownloader<Note> for MockDownloader {
    async fn download(&self, mut note: Note) -> SyncResult<Note> {
        self.check(&note)?;
        if note.content.is_none() {
            let title = note.title.as_deref().unwrap_or_default();
            note.content = Some(format!("<en-note>{}</en-note>", title));
        }
        Ok(note)
    }
}

#[async_trait]
impl FullDataDownloader<Resource> for MockDownloader {
    async fn download(&self, mut resource: Resource) -> SyncResult<Resource> {
        self.check(&resource)?;
        if resource.data.is_none() {
            let name = resource.file_name.as_deref().unwrap_or_default();
            resource.data = Some(name.as_bytes().to_vec());
        }
        Ok(resource)
    }
}
