//! Mock remote service for testing.
//!
//! Serves queued chunks and captures sent entities for verification.

use super::{RemoteService, SendReceipt};
use crate::error::{SyncError, SyncResult};
use crate::ledger_store::SyncScope;
use crate::lock;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use sync_types::{Entity, Guid, LinkedNotebook, SyncChunk, Usn};

/// Mock remote service.
///
/// Clones share the same state.
#[derive(Debug, Default)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    own_chunks: Vec<SyncChunk>,
    linked_chunks: BTreeMap<Guid, Vec<SyncChunk>>,
    linked_notebooks: Vec<LinkedNotebook>,
    sent: Vec<(SyncScope, Entity)>,
    fetches: Vec<(SyncScope, Usn)>,
    update_count: u32,
    next_guid: u32,
    fail_next_fetch: Option<String>,
    fail_sends: Option<(String, usize)>,
}

impl MockRemoteInner {
    fn observe(&mut self, chunk: &SyncChunk) {
        if let Some(usn) = chunk.high_usn() {
            self.update_count = self.update_count.max(usn.value());
        }
    }
}

impl MockRemote {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk of the own account.
    pub fn push_own_chunk(&self, chunk: SyncChunk) {
        let mut inner = lock(&self.inner);
        inner.observe(&chunk);
        inner.own_chunks.push(chunk);
    }

    /// Share a linked notebook into the account.
    pub fn add_linked_notebook(&self, notebook: LinkedNotebook) {
        lock(&self.inner).linked_notebooks.push(notebook);
    }

    /// Queue a chunk of a linked notebook.
    pub fn push_linked_chunk(&self, linked_notebook: &str, chunk: SyncChunk) {
        let mut inner = lock(&self.inner);
        inner.observe(&chunk);
        inner
            .linked_chunks
            .entry(Guid::new(linked_notebook))
            .or_default()
            .push(chunk);
    }

    /// Every entity sent so far, with its target scope.
    pub fn sent(&self) -> Vec<(SyncScope, Entity)> {
        lock(&self.inner).sent.clone()
    }

    /// Every fetch so far, with the USN it started after.
    pub fn fetches(&self) -> Vec<(SyncScope, Usn)> {
        lock(&self.inner).fetches.clone()
    }

    /// Cause the next fetch to fail with the given error.
    pub fn fail_next_fetch(&self, error: &str) {
        lock(&self.inner).fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next send to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.fail_next_sends(error, 1);
    }

    /// Cause the next `times` sends to fail with the given error.
    pub fn fail_next_sends(&self, error: &str, times: usize) {
        lock(&self.inner).fail_sends = Some((error.to_string(), times)).filter(|_| times > 0);
    }
}

impl Clone for MockRemote {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn linked_notebooks(&self) -> SyncResult<Vec<LinkedNotebook>> {
        Ok(lock(&self.inner).linked_notebooks.clone())
    }

    async fn fetch_chunks(&self, scope: &SyncScope, after: Usn) -> SyncResult<Vec<SyncChunk>> {
        let mut inner = lock(&self.inner);
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(SyncError::Remote(error));
        }
        inner.fetches.push((scope.clone(), after));

        let chunks = match scope {
            SyncScope::Own => inner.own_chunks.clone(),
            SyncScope::Linked(guid) => inner.linked_chunks.get(guid).cloned().unwrap_or_default(),
        };
        Ok(chunks
            .into_iter()
            .filter(|chunk| chunk.high_usn().map_or(true, |usn| usn > after))
            .collect())
    }

    async fn send(&self, scope: &SyncScope, entity: &Entity) -> SyncResult<SendReceipt> {
        let mut inner = lock(&self.inner);
        if let Some((error, times)) = inner.fail_sends.take() {
            if times > 1 {
                inner.fail_sends = Some((error.clone(), times - 1));
            }
            return Err(SyncError::Remote(error));
        }

        let guid = match entity.guid() {
            Some(guid) => guid.clone(),
            None => {
                inner.next_guid += 1;
                Guid::new(format!("remote-{}", inner.next_guid))
            }
        };
        inner.update_count += 1;
        let usn = Usn::new(inner.update_count);
        inner.sent.push((scope.clone(), entity.clone()));

        Ok(SendReceipt { guid, usn })
    }
}
