//! Applying sync chunks of one entity kind to local storage.
//!
//! # Design
//!
//! - Chunk contents are collected first (expunge wins, newest USN wins)
//! - Tags are sorted parent-before-child and processed one after another
//! - Every other kind is processed item-by-item concurrently
//! - Expunges run concurrently with the items
//! - A failing item is recorded in the [`Status`] and never aborts its
//!   siblings; only a tag cycle fails the whole call

mod download;
mod linker;

pub use download::MockDownloader;
pub use linker::{NoteLinker, ResourceLinker, TagLinker};

use async_trait::async_trait;
use futures_util::future::{join, join_all};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sync_core::{collect, Progress, Status, TopologicalSorter};
use sync_types::{Guid, LocalId, SyncChunk, SyncEntity};

use crate::conflict::{ConflictResolution, ConflictResolver};
use crate::error::{SyncError, SyncResult};
use crate::lock;
use crate::storage::EntityStore;

/// Receives the kind's counters after every change.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Resolves references of a remote entity to local ids before it is stored.
#[async_trait]
pub trait EntityLinker<K: SyncEntity>: Send + Sync {
    /// Return the entity with its local references filled in.
    async fn link(&self, entity: K) -> SyncResult<K>;
}

/// Fetches the full payload of an entity that arrived as metadata only.
#[async_trait]
pub trait FullDataDownloader<K: SyncEntity>: Send + Sync {
    /// Return the entity with its full data.
    async fn download(&self, entity: K) -> SyncResult<K>;
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. Items that have not started when the
/// flag is raised are recorded as cancelled instead of being processed.
#[derive(Debug, Clone, Default)]
pub struct Canceler(Arc<AtomicBool>);

impl Canceler {
    /// Create a flag that is not raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is raised.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Lower the flag for the next session.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What happened to one remote entity.
enum Applied<K> {
    Added(K),
    Updated(K),
    Kept(K),
}

/// Processes the sync chunks of one entity kind.
pub struct SyncChunkProcessor<K: SyncEntity> {
    store: Arc<dyn EntityStore<K>>,
    resolver: Arc<ConflictResolver<K>>,
    linker: Option<Arc<dyn EntityLinker<K>>>,
    downloader: Option<Arc<dyn FullDataDownloader<K>>>,
    canceler: Canceler,
}

impl<K: SyncEntity> SyncChunkProcessor<K> {
    /// Create a processor writing to `store`.
    pub fn new(store: Arc<dyn EntityStore<K>>) -> Self {
        Self {
            resolver: ConflictResolver::new(Arc::clone(&store)),
            store,
            linker: None,
            downloader: None,
            canceler: Canceler::new(),
        }
    }

    /// Resolve local references with `linker` before storing.
    pub fn with_linker(mut self, linker: Arc<dyn EntityLinker<K>>) -> Self {
        self.linker = Some(linker);
        self
    }

    /// Fetch full data with `downloader` before storing.
    pub fn with_downloader(mut self, downloader: Arc<dyn FullDataDownloader<K>>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Observe an externally owned cancellation flag.
    pub fn with_canceler(mut self, canceler: Canceler) -> Self {
        self.canceler = canceler;
        self
    }

    /// The cancellation flag of this processor.
    pub fn canceler(&self) -> &Canceler {
        &self.canceler
    }

    /// Apply `chunks` to local storage.
    ///
    /// Per-item failures are recorded in the returned status. The call
    /// itself fails only with [`SyncError::CycleDetected`] when tags form
    /// a cycle; nothing of the batch is applied then.
    pub async fn process(
        &self,
        chunks: &[SyncChunk],
        progress: Option<ProgressCallback>,
    ) -> SyncResult<Status<K>> {
        let collected = collect::<K>(chunks);
        let items = if K::HIERARCHICAL {
            sort_parents_first(collected.items)?
        } else {
            collected.items
        };

        tracing::debug!(
            kind = %K::KIND,
            items = items.len(),
            expunges = collected.expunged.len(),
            "Processing sync chunks"
        );

        let status = Mutex::new(Status::new(items.len(), collected.expunged.len()));
        let progress = progress.as_ref();

        let expunges = join_all(
            collected
                .expunged
                .into_iter()
                .map(|guid| self.expunge_one(guid, &status, progress)),
        );

        if K::HIERARCHICAL {
            let chained = async {
                for item in items {
                    self.process_one(item, &status, progress).await;
                }
            };
            join(chained, expunges).await;
        } else {
            let concurrent = join_all(
                items
                    .into_iter()
                    .map(|item| self.process_one(item, &status, progress)),
            );
            join(concurrent, expunges).await;
        }

        let status = status.into_inner().unwrap_or_else(|e| e.into_inner());
        tracing::info!(
            kind = %K::KIND,
            added = status.progress.added,
            updated = status.progress.updated,
            expunged = status.progress.expunged,
            failures = status.failure_count(),
            "Processed sync chunks"
        );
        Ok(status)
    }

    async fn process_one(
        &self,
        item: K,
        status: &Mutex<Status<K>>,
        progress: Option<&ProgressCallback>,
    ) {
        if self.canceler.is_canceled() {
            let error = SyncError::OperationCanceled.to_item_error();
            record(status, progress, |s| s.record_cancelled(item, error));
            return;
        }
        if item.guid().is_none() {
            let error = SyncError::InvalidArgument(format!("{} has no guid", item.describe()));
            tracing::warn!(entity = %item.describe(), "Remote entity without guid");
            record(status, progress, |s| {
                s.record_failed_to_process(item, error.to_item_error())
            });
            return;
        }

        let item = match &self.downloader {
            Some(downloader) => match downloader.download(item.clone()).await {
                Ok(full) => full,
                Err(err) => {
                    tracing::warn!(entity = %item.describe(), error = %err, "Download failed");
                    if err.is_rate_limited() {
                        tracing::warn!(kind = %K::KIND, "Rate limited, cancelling the rest of the batch");
                        self.canceler.cancel();
                    }
                    record(status, progress, |s| {
                        s.record_failed_to_download(item, err.to_item_error())
                    });
                    return;
                }
            },
            None => item,
        };

        let outcome = match &self.linker {
            Some(linker) => match linker.link(item.clone()).await {
                Ok(linked) => self.apply(linked).await,
                Err(err) => Err(err),
            },
            None => self.apply(item.clone()).await,
        };

        match outcome {
            Ok(Applied::Added(entity)) => {
                tracing::debug!(entity = %entity.describe(), "Added");
                record(status, progress, |s| s.record_added(&entity));
            }
            Ok(Applied::Updated(entity)) => {
                tracing::debug!(entity = %entity.describe(), "Updated");
                record(status, progress, |s| s.record_updated(&entity));
            }
            Ok(Applied::Kept(entity)) => {
                tracing::debug!(entity = %entity.describe(), "Local version kept");
                lock(status).record_kept(&entity);
            }
            Err(err) => {
                tracing::warn!(entity = %item.describe(), error = %err, "Failed to process");
                record(status, progress, |s| {
                    s.record_failed_to_process(item, err.to_item_error())
                });
            }
        }
    }

    /// Store `theirs`, resolving a conflict with the local counterpart.
    async fn apply(&self, mut theirs: K) -> SyncResult<Applied<K>> {
        let guid = theirs
            .guid()
            .cloned()
            .ok_or_else(|| SyncError::InvalidArgument(format!("{} has no guid", theirs.describe())))?;

        let mut found = self.store.find_by_guid(&guid).await?;
        if found.is_none() && K::UNIQUE_NAMES {
            if let Some(name) = theirs.name() {
                found = self
                    .store
                    .find_by_name(name, theirs.linked_notebook_guid())
                    .await?;
            }
        }
        let Some(mine) = found else {
            self.store.put(theirs.clone()).await?;
            return Ok(Applied::Added(theirs));
        };

        match self.resolver.resolve(theirs.clone(), mine.clone()).await? {
            ConflictResolution::UseTheirs => {
                theirs.set_local_id(mine.local_id());
                theirs.carry_local_fields(&mine);
                self.store.put(theirs.clone()).await?;
                Ok(Applied::Updated(theirs))
            }
            ConflictResolution::UseMine => Ok(Applied::Kept(theirs)),
            ConflictResolution::IgnoreMine => {
                self.store.put(theirs.clone()).await?;
                Ok(Applied::Added(theirs))
            }
            ConflictResolution::MoveMine(mut copy) => {
                if copy.guid() == theirs.guid() {
                    copy.set_local_id(LocalId::new());
                    copy.set_guid(None);
                    copy.set_usn(None);
                    copy.set_locally_modified(true);
                    self.store.put(copy).await?;

                    theirs.set_local_id(mine.local_id());
                    theirs.carry_local_fields(&mine);
                    self.store.put(theirs.clone()).await?;
                    Ok(Applied::Updated(theirs))
                } else {
                    self.store.put(copy).await?;
                    self.store.put(theirs.clone()).await?;
                    Ok(Applied::Added(theirs))
                }
            }
        }
    }

    async fn expunge_one(
        &self,
        guid: Guid,
        status: &Mutex<Status<K>>,
        progress: Option<&ProgressCallback>,
    ) {
        match self.store.expunge_by_guid(&guid).await {
            Ok(existed) => {
                tracing::debug!(kind = %K::KIND, %guid, existed, "Expunged");
                record(status, progress, |s| s.record_expunged(guid));
            }
            Err(err) => {
                tracing::warn!(kind = %K::KIND, %guid, error = %err, "Failed to expunge");
                record(status, progress, |s| {
                    s.record_failed_to_expunge(guid, err.to_item_error())
                });
            }
        }
    }
}

/// Update the status, then report progress with the lock released.
fn record<K>(
    status: &Mutex<Status<K>>,
    progress: Option<&ProgressCallback>,
    update: impl FnOnce(&mut Status<K>),
) {
    let snapshot = {
        let mut status = lock(status);
        update(&mut status);
        status.progress
    };
    if let Some(callback) = progress {
        callback(snapshot);
    }
}

/// Order hierarchical items parents first.
///
/// A parent outside the batch counts as a root here; the linker attaches
/// the child to a stored parent or detaches it.
fn sort_parents_first<K: SyncEntity>(items: Vec<K>) -> SyncResult<Vec<K>> {
    let in_batch: HashSet<String> = items.iter().map(sort_key).collect();
    let sorted = TopologicalSorter::new().sort_items(items, |item| {
        let parent = item
            .parent_guid()
            .map(|p| p.as_str().to_string())
            .filter(|p| in_batch.contains(p));
        (sort_key(item), parent)
    });
    sorted.map_err(|err| {
        tracing::error!(kind = %K::KIND, chain = ?err.chain, "Cycle in parent/child relation");
        SyncError::from(err)
    })
}

fn sort_key<K: SyncEntity>(item: &K) -> String {
    match item.guid() {
        Some(guid) => guid.as_str().to_string(),
        None => item.local_id().as_uuid().to_string(),
    }
}
