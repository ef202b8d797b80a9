//! Sync session orchestration.
//!
//! [`SyncEngine::sync`] drives the [`SyncStage`] machine from `sync-core`:
//! it interprets each [`StageAction`], runs the work, and feeds the outcome
//! back as a [`StageEvent`] until the session finishes or fails.
//!
//! Downloading a scope runs one [`DurableProcessor`] per kind, in order
//! tags, saved searches (own account only), notebooks, notes, resources.
//! A tag cycle aborts only the tag batch of that scope.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use sync_core::{
    Progress, QueuedChange, SendQueue, StageAction, StageEvent, Status, SyncEvent, SyncStage,
    TopologicalSorter,
};
use sync_types::{
    Entity, EntityKind, Guid, LinkedNotebook, LocalId, Note, Notebook, Resource, SavedSearch,
    SyncChunk, SyncEntity, Tag,
};
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::durable::DurableProcessor;
use crate::error::{SyncError, SyncResult};
use crate::finder::{NoteFinder, NotebookFinder, TagFinder};
use crate::ledger_store::{LedgerStore, SyncScope};
use crate::lock;
use crate::processor::{
    Canceler, FullDataDownloader, NoteLinker, ProgressCallback, ResourceLinker,
    SyncChunkProcessor, TagLinker,
};
use crate::remote::{RemoteService, SendReceipt};
use crate::storage::EntityStore;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Receives per-kind counters of every scope after every change.
pub type ScopeProgressCallback = Arc<dyn Fn(&SyncScope, EntityKind, Progress) + Send + Sync>;

/// Typed handles of the local store, one per kind.
#[derive(Clone)]
pub struct Stores {
    /// Tags.
    pub tags: Arc<dyn EntityStore<Tag>>,
    /// Saved searches.
    pub saved_searches: Arc<dyn EntityStore<SavedSearch>>,
    /// Notebooks.
    pub notebooks: Arc<dyn EntityStore<Notebook>>,
    /// Notes.
    pub notes: Arc<dyn EntityStore<Note>>,
    /// Resources.
    pub resources: Arc<dyn EntityStore<Resource>>,
}

impl Stores {
    /// Handles for a store that serves every kind.
    pub fn shared<S>(store: S) -> Self
    where
        S: EntityStore<Tag>
            + EntityStore<SavedSearch>
            + EntityStore<Notebook>
            + EntityStore<Note>
            + EntityStore<Resource>
            + Clone
            + 'static,
    {
        Self {
            tags: Arc::new(store.clone()),
            saved_searches: Arc::new(store.clone()),
            notebooks: Arc::new(store.clone()),
            notes: Arc::new(store.clone()),
            resources: Arc::new(store),
        }
    }
}

/// Outcome of downloading one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSummary {
    /// The scope.
    pub scope: SyncScope,
    /// Counters per kind (replayed and fresh work combined).
    pub kinds: BTreeMap<EntityKind, Progress>,
    /// Failed or cancelled entries across kinds.
    pub failures: usize,
    /// Ids of a tag cycle that aborted the tag batch.
    pub cycle: Option<Vec<String>>,
    /// Linked notebooks the own account's chunks expunged.
    pub expunged_linked_notebooks: Vec<Guid>,
}

impl ScopeSummary {
    fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            kinds: BTreeMap::new(),
            failures: 0,
            cycle: None,
            expunged_linked_notebooks: Vec::new(),
        }
    }

    fn record<K: SyncEntity>(&mut self, status: &Status<K>) {
        self.kinds.insert(K::KIND, status.progress);
        self.failures += status.failure_count();
    }

    /// Counters of one kind, zero if the kind was not processed.
    pub fn progress(&self, kind: EntityKind) -> Progress {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }
}

/// Outcome of one sync session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    /// Downloaded scopes, own account first.
    pub scopes: Vec<ScopeSummary>,
    /// Local changes sent successfully.
    pub sent: usize,
    /// Local changes that could not be sent.
    pub send_failures: usize,
}

impl SyncSummary {
    /// Summary of one scope.
    pub fn scope(&self, scope: &SyncScope) -> Option<&ScopeSummary> {
        self.scopes.iter().find(|s| &s.scope == scope)
    }
}

struct Finders {
    tags: Arc<TagFinder>,
    notebooks: Arc<NotebookFinder>,
    notes: Arc<NoteFinder>,
}

/// Runs sync sessions for one account.
pub struct SyncEngine {
    config: SyncConfig,
    stores: Stores,
    finders: Finders,
    remote: Arc<dyn RemoteService>,
    ledgers: Arc<LedgerStore>,
    note_downloader: Option<Arc<dyn FullDataDownloader<Note>>>,
    resource_downloader: Option<Arc<dyn FullDataDownloader<Resource>>>,
    progress: Option<ScopeProgressCallback>,
    events: broadcast::Sender<SyncEvent>,
    canceler: Canceler,
    stage: Mutex<SyncStage>,
}

impl SyncEngine {
    /// Create an engine.
    pub fn new(
        config: SyncConfig,
        stores: Stores,
        remote: Arc<dyn RemoteService>,
        ledgers: Arc<LedgerStore>,
    ) -> Self {
        let finders = Finders {
            tags: Arc::new(TagFinder::new(Arc::clone(&stores.tags))),
            notebooks: Arc::new(NotebookFinder::new(
                Arc::clone(&stores.notebooks),
                Arc::clone(&stores.notes),
            )),
            notes: Arc::new(NoteFinder::new(Arc::clone(&stores.notes))),
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            stores,
            finders,
            remote,
            ledgers,
            note_downloader: None,
            resource_downloader: None,
            progress: None,
            events,
            canceler: Canceler::new(),
            stage: Mutex::new(SyncStage::new()),
        }
    }

    /// Fetch note bodies with `downloader` before storing notes.
    pub fn with_note_downloader(mut self, downloader: Arc<dyn FullDataDownloader<Note>>) -> Self {
        self.note_downloader = Some(downloader);
        self
    }

    /// Fetch resource data with `downloader` before storing resources.
    pub fn with_resource_downloader(
        mut self,
        downloader: Arc<dyn FullDataDownloader<Resource>>,
    ) -> Self {
        self.resource_downloader = Some(downloader);
        self
    }

    /// Report live per-kind progress.
    pub fn with_progress(mut self, callback: ScopeProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Current stage.
    pub fn stage(&self) -> SyncStage {
        lock(&self.stage).clone()
    }

    /// Stop starting new items in the running session.
    pub fn cancel(&self) {
        tracing::info!(account = %self.config.account, "Sync cancelled");
        self.canceler.cancel();
    }

    /// Run one sync session.
    ///
    /// Fails if a session is already running, or with the error that
    /// failed a stage. Per-item failures do not fail the session; they
    /// are counted in the summary and replayed next session.
    pub async fn sync(&self) -> SyncResult<SyncSummary> {
        let mut pending: VecDeque<StageAction> = self
            .transition(StageEvent::SyncRequested {
                send_enabled: self.config.send_local_changes,
            })
            .into();
        if pending.is_empty() {
            return Err(SyncError::InvalidArgument(
                "a sync session is already running".to_string(),
            ));
        }
        self.canceler.reset();
        let mut session = SessionGuard {
            engine: self,
            finished: false,
        };

        let mut summary = SyncSummary::default();
        let mut linked: Vec<LinkedNotebook> = Vec::new();
        let mut failure: Option<SyncError> = None;

        while let Some(action) = pending.pop_front() {
            let outcome = match action {
                StageAction::EmitEvent(event) => {
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                    continue;
                }
                StageAction::DownloadOwn => match self.download_own(&mut summary).await {
                    Ok(notebooks) => {
                        linked = notebooks;
                        Ok(StageEvent::OwnDownloaded {
                            linked_notebooks: linked.len(),
                        })
                    }
                    Err(err) => Err(err),
                },
                StageAction::DownloadLinked { index } => match linked.get(index) {
                    Some(notebook) => {
                        let scope = SyncScope::Linked(notebook.guid.clone());
                        match self.download_scope(scope).await {
                            Ok(scope_summary) => {
                                summary.scopes.push(scope_summary);
                                Ok(StageEvent::LinkedDownloaded)
                            }
                            Err(err) => Err(err),
                        }
                    }
                    None => Err(SyncError::InvalidArgument(format!(
                        "no linked notebook at index {}",
                        index
                    ))),
                },
                StageAction::SendLocalChanges => self
                    .send_local_changes(&mut summary)
                    .await
                    .map(|()| StageEvent::SendCompleted),
            };

            let event = match outcome {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(account = %self.config.account, error = %err, "Sync stage failed");
                    let event = StageEvent::StageFailed {
                        error: err.to_string(),
                    };
                    failure = Some(err);
                    event
                }
            };
            pending.extend(self.transition(event));
        }
        session.finished = true;

        match failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(
                    account = %self.config.account,
                    scopes = summary.scopes.len(),
                    sent = summary.sent,
                    send_failures = summary.send_failures,
                    "Sync finished"
                );
                Ok(summary)
            }
        }
    }

    fn emit(&self, actions: Vec<StageAction>) {
        for action in actions {
            if let StageAction::EmitEvent(event) = action {
                let _ = self.events.send(event);
            }
        }
    }

    fn transition(&self, event: StageEvent) -> Vec<StageAction> {
        let mut stage = lock(&self.stage);
        let current = std::mem::take(&mut *stage);
        let from = current.name();
        let (next, actions) = current.on_event(event);
        tracing::debug!(from, to = next.name(), "Sync stage transition");
        *stage = next;
        actions
    }

    // ===========================================
    // Download
    // ===========================================

    async fn download_own(&self, summary: &mut SyncSummary) -> SyncResult<Vec<LinkedNotebook>> {
        let own = self.download_scope(SyncScope::Own).await?;
        let expunged: HashSet<Guid> = own.expunged_linked_notebooks.iter().cloned().collect();
        summary.scopes.push(own);

        if !self.config.sync_linked_notebooks {
            return Ok(Vec::new());
        }
        let linked = self
            .remote
            .linked_notebooks()
            .await?
            .into_iter()
            .filter(|notebook| !expunged.contains(&notebook.guid))
            .collect();
        Ok(linked)
    }

    async fn download_scope(&self, scope: SyncScope) -> SyncResult<ScopeSummary> {
        let after = self.ledgers.update_count(&scope).await?;
        let mut chunks = self.remote.fetch_chunks(&scope, after).await?;
        if let Some(guid) = scope.linked_notebook_guid() {
            stamp_linked_notebook(&mut chunks, guid);
        }
        tracing::info!(
            scope = %scope,
            after = %after,
            chunks = chunks.len(),
            "Downloading scope"
        );

        let mut summary = ScopeSummary::new(scope.clone());
        self.run_kind(&scope, &chunks, self.tag_processor(), &mut summary)
            .await?;
        if scope == SyncScope::Own {
            let saved_searches = SyncChunkProcessor::new(Arc::clone(&self.stores.saved_searches));
            self.run_kind(&scope, &chunks, saved_searches, &mut summary)
                .await?;
        }
        let notebooks = SyncChunkProcessor::new(Arc::clone(&self.stores.notebooks));
        self.run_kind(&scope, &chunks, notebooks, &mut summary)
            .await?;
        self.run_kind(&scope, &chunks, self.note_processor(), &mut summary)
            .await?;
        self.run_kind(&scope, &chunks, self.resource_processor(), &mut summary)
            .await?;

        if scope == SyncScope::Own {
            for chunk in &chunks {
                for guid in &chunk.expunged_linked_notebooks {
                    tracing::info!(linked_notebook = %guid, "Linked notebook expunged, dropping its ledger");
                    self.ledgers
                        .reset(Some(&SyncScope::Linked(guid.clone())))
                        .await?;
                    summary.expunged_linked_notebooks.push(guid.clone());
                }
            }
        }

        let high = chunks.iter().filter_map(SyncChunk::high_usn).max();
        match (high, &summary.cycle) {
            (Some(high), None) if high > after => {
                self.ledgers.set_update_count(&scope, high).await?;
                tracing::debug!(scope = %scope, usn = %high, "Update count advanced");
            }
            (_, Some(chain)) => {
                tracing::warn!(scope = %scope, chain = ?chain, "Update count kept because of a tag cycle");
            }
            _ => {}
        }
        Ok(summary)
    }

    async fn run_kind<K: SyncEntity>(
        &self,
        scope: &SyncScope,
        chunks: &[SyncChunk],
        processor: SyncChunkProcessor<K>,
        summary: &mut ScopeSummary,
    ) -> SyncResult<()> {
        let durable = DurableProcessor::new(
            processor.with_canceler(self.canceler.clone()),
            Arc::clone(&self.ledgers),
            scope.clone(),
        )
        .with_max_batch_entries(self.config.max_batch_entries);

        let progress = self.progress.clone().map(|callback| {
            let scope = scope.clone();
            Arc::new(move |p: Progress| callback(&scope, K::KIND, p)) as ProgressCallback
        });

        match durable.process_durable(chunks, progress).await {
            Ok(status) => {
                summary.record(&status);
                Ok(())
            }
            Err(SyncError::CycleDetected { chain }) => {
                tracing::warn!(scope = %scope, kind = %K::KIND, chain = ?chain, "Batch skipped because of a cycle");
                summary.failures += chain.len();
                summary.cycle = Some(chain);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn tag_processor(&self) -> SyncChunkProcessor<Tag> {
        SyncChunkProcessor::new(Arc::clone(&self.stores.tags))
            .with_linker(Arc::new(TagLinker::new(Arc::clone(&self.finders.tags))))
    }

    fn note_processor(&self) -> SyncChunkProcessor<Note> {
        let processor = SyncChunkProcessor::new(Arc::clone(&self.stores.notes)).with_linker(
            Arc::new(NoteLinker::new(Arc::clone(&self.finders.notebooks))),
        );
        match &self.note_downloader {
            Some(downloader) => processor.with_downloader(Arc::clone(downloader)),
            None => processor,
        }
    }

    fn resource_processor(&self) -> SyncChunkProcessor<Resource> {
        let processor = SyncChunkProcessor::new(Arc::clone(&self.stores.resources))
            .with_linker(Arc::new(ResourceLinker::new(Arc::clone(&self.finders.notes))));
        match &self.resource_downloader {
            Some(downloader) => processor.with_downloader(Arc::clone(downloader)),
            None => processor,
        }
    }

    // ===========================================
    // Send
    // ===========================================

    async fn send_local_changes(&self, summary: &mut SyncSummary) -> SyncResult<()> {
        let changes = self.collect_local_changes(summary).await?;
        tracing::info!(changes = changes.len(), "Sending local changes");

        let mut queue = SendQueue::new(self.config.send_queue_capacity);
        for change in changes {
            if queue.total_count() >= self.config.send_queue_capacity {
                self.drain(&mut queue, summary).await?;
            }
            queue
                .enqueue(change)
                .map_err(|err| SyncError::InvalidArgument(err.to_string()))?;
        }
        self.drain(&mut queue, summary).await
    }

    /// Dirty entities of every kind, each routed to its target scope.
    async fn collect_local_changes(&self, summary: &mut SyncSummary) -> SyncResult<Vec<QueuedChange>> {
        let mut changes = Vec::new();

        let tags = self.stores.tags.find_locally_modified().await?;
        let dirty: HashSet<String> = tags.iter().map(|t| t.local_id.to_string()).collect();
        let ordered = TopologicalSorter::new().sort_items(tags, |tag| {
            let parent = tag
                .parent_local_id
                .map(|p| p.to_string())
                .filter(|p| dirty.contains(p));
            (tag.local_id.to_string(), parent)
        });
        match ordered {
            Ok(tags) => {
                for tag in tags {
                    let target = tag.linked_notebook_guid.clone();
                    changes.push(QueuedChange::new(Entity::Tag(tag), target));
                }
            }
            Err(err) => {
                tracing::warn!(chain = ?err.chain, "Local tags form a cycle, not sending tags");
                summary.send_failures += dirty.len();
            }
        }

        for search in self.stores.saved_searches.find_locally_modified().await? {
            changes.push(QueuedChange::new(Entity::SavedSearch(search), None));
        }
        for notebook in self.stores.notebooks.find_locally_modified().await? {
            let target = notebook.linked_notebook_guid.clone();
            changes.push(QueuedChange::new(Entity::Notebook(notebook), target));
        }
        for note in self.stores.notes.find_locally_modified().await? {
            let target = self
                .finders
                .notebooks
                .find_linked_notebook_guid_of_note(note.local_id)
                .await?;
            changes.push(QueuedChange::new(Entity::Note(note), target));
        }
        for resource in self.stores.resources.find_locally_modified().await? {
            let target = match resource.note_local_id {
                Some(note) => {
                    self.finders
                        .notebooks
                        .find_linked_notebook_guid_of_note(note)
                        .await?
                }
                None => None,
            };
            changes.push(QueuedChange::new(Entity::Resource(resource), target));
        }

        if !self.config.sync_linked_notebooks {
            changes.retain(|change| change.target.is_none());
        }
        Ok(changes)
    }

    async fn drain(&self, queue: &mut SendQueue, summary: &mut SyncSummary) -> SyncResult<()> {
        let mut attempts: HashMap<LocalId, u32> = HashMap::new();
        while let Some(change) = queue.dequeue() {
            let local_id = change.local_id();
            let attempt = attempts.entry(local_id).or_insert(0);
            *attempt += 1;
            let attempt = *attempt;
            let scope = match &change.target {
                Some(guid) => SyncScope::Linked(guid.clone()),
                None => SyncScope::Own,
            };
            let entity = self.fill_references(change.entity).await?;

            match self.remote.send(&scope, &entity).await {
                Ok(receipt) => {
                    tracing::debug!(
                        scope = %scope,
                        kind = %entity.kind(),
                        guid = %receipt.guid,
                        usn = %receipt.usn,
                        "Sent"
                    );
                    self.store_sent(entity, receipt).await?;
                    queue.ack(&local_id);
                    summary.sent += 1;
                }
                Err(err) if err.is_transient() && attempt < MAX_SEND_ATTEMPTS => {
                    tracing::debug!(scope = %scope, kind = %entity.kind(), attempt, error = %err, "Send failed, retrying");
                    queue.nack(&local_id);
                }
                Err(err) => {
                    tracing::warn!(scope = %scope, kind = %entity.kind(), attempt, error = %err, "Send failed");
                    queue.abandon(&local_id);
                    summary.send_failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Fill guids of referenced entities that were sent earlier.
    async fn fill_references(&self, entity: Entity) -> SyncResult<Entity> {
        Ok(match entity {
            Entity::Tag(mut tag) => {
                if let Some(parent) = tag.parent_local_id.filter(|_| tag.parent_guid.is_none()) {
                    tag.parent_guid = self
                        .finders
                        .tags
                        .find_by_local_id(parent)
                        .await?
                        .and_then(|p| p.guid);
                }
                Entity::Tag(tag)
            }
            Entity::Note(mut note) => {
                if let Some(notebook) = note.notebook_local_id.filter(|_| note.notebook_guid.is_none()) {
                    note.notebook_guid = self
                        .finders
                        .notebooks
                        .find_by_local_id(notebook)
                        .await?
                        .and_then(|nb| nb.guid);
                }
                Entity::Note(note)
            }
            Entity::Resource(mut resource) => {
                if let Some(note) = resource.note_local_id.filter(|_| resource.note_guid.is_none()) {
                    resource.note_guid = self
                        .finders
                        .notes
                        .find_by_local_id(note)
                        .await?
                        .and_then(|n| n.guid);
                }
                Entity::Resource(resource)
            }
            other => other,
        })
    }

    async fn store_sent(&self, entity: Entity, receipt: SendReceipt) -> SyncResult<()> {
        match entity {
            Entity::Tag(tag) => mark_sent(&self.stores.tags, tag, receipt).await,
            Entity::SavedSearch(search) => {
                mark_sent(&self.stores.saved_searches, search, receipt).await
            }
            Entity::Notebook(notebook) => mark_sent(&self.stores.notebooks, notebook, receipt).await,
            Entity::Note(note) => mark_sent(&self.stores.notes, note, receipt).await,
            Entity::Resource(resource) => {
                mark_sent(&self.stores.resources, resource, receipt).await
            }
        }
    }
}

/// Fails the running stage if a session future is dropped mid-flight.
struct SessionGuard<'a> {
    engine: &'a SyncEngine,
    finished: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(account = %self.engine.config.account, "Sync session dropped before finishing");
        self.engine.canceler.cancel();
        let actions = self.engine.transition(StageEvent::StageFailed {
            error: SyncError::OperationCanceled.to_string(),
        });
        self.engine.emit(actions);
    }
}

async fn mark_sent<K: SyncEntity>(
    store: &Arc<dyn EntityStore<K>>,
    mut entity: K,
    receipt: SendReceipt,
) -> SyncResult<()> {
    entity.set_guid(Some(receipt.guid));
    entity.set_usn(Some(receipt.usn));
    entity.set_locally_modified(false);
    store.put(entity).await
}

/// Mark every tag and notebook of a linked scope as owned by it.
fn stamp_linked_notebook(chunks: &mut [SyncChunk], guid: &Guid) {
    for chunk in chunks {
        for tag in &mut chunk.tags {
            tag.linked_notebook_guid = Some(guid.clone());
        }
        for notebook in &mut chunk.notebooks {
            notebook.linked_notebook_guid = Some(guid.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use crate::settings::MemorySettingsBackend;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use sync_types::Usn;
    use tokio::sync::Notify;

    struct Fixture {
        store: MemoryStorage,
        remote: MockRemote,
        ledgers: Arc<LedgerStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStorage::new(),
                remote: MockRemote::new(),
                ledgers: Arc::new(LedgerStore::new(Arc::new(MemorySettingsBackend::new()))),
            }
        }

        fn engine(&self, config: SyncConfig) -> SyncEngine {
            SyncEngine::new(
                config,
                Stores::shared(self.store.clone()),
                Arc::new(self.remote.clone()),
                Arc::clone(&self.ledgers),
            )
        }
    }

    #[tokio::test]
    async fn session_emits_stage_events_in_order() {
        let fx = Fixture::new();
        fx.remote
            .add_linked_notebook(LinkedNotebook::new("ln1", "Shared", "alice"));
        let engine = fx.engine(SyncConfig::new("test"));
        let mut events = engine.subscribe();

        engine.sync().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SyncEvent::Started,
                SyncEvent::LinkedNotebookStarted { index: 0, total: 1 },
                SyncEvent::SendingStarted,
                SyncEvent::Finished,
            ]
        );
        assert_eq!(engine.stage(), SyncStage::Finished);
    }

    #[tokio::test]
    async fn fetch_failure_fails_the_session() {
        let fx = Fixture::new();
        fx.remote.fail_next_fetch("service unavailable");
        let engine = fx.engine(SyncConfig::new("test"));

        let err = engine.sync().await.unwrap_err();

        assert!(matches!(err, SyncError::Remote(_)));
        assert!(matches!(engine.stage(), SyncStage::Failed { .. }));
        // A failed session can be restarted.
        assert!(engine.sync().await.is_ok());
    }

    struct GatedRemote {
        inner: MockRemote,
        gate: Arc<Notify>,
        gated: AtomicBool,
    }

    #[async_trait]
    impl RemoteService for GatedRemote {
        async fn linked_notebooks(&self) -> SyncResult<Vec<LinkedNotebook>> {
            self.inner.linked_notebooks().await
        }

        async fn fetch_chunks(&self, scope: &SyncScope, after: Usn) -> SyncResult<Vec<SyncChunk>> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.inner.fetch_chunks(scope, after).await
        }

        async fn send(&self, scope: &SyncScope, entity: &Entity) -> SyncResult<SendReceipt> {
            self.inner.send(scope, entity).await
        }
    }

    #[tokio::test]
    async fn dropped_session_can_be_restarted() {
        let fx = Fixture::new();
        let remote = Arc::new(GatedRemote {
            inner: fx.remote.clone(),
            gate: Arc::new(Notify::new()),
            gated: AtomicBool::new(true),
        });
        let engine = SyncEngine::new(
            SyncConfig::new("test"),
            Stores::shared(fx.store.clone()),
            remote,
            Arc::clone(&fx.ledgers),
        );
        let mut events = engine.subscribe();

        let dropped = tokio::time::timeout(Duration::from_millis(50), engine.sync()).await;
        assert!(dropped.is_err());

        assert_eq!(
            engine.stage(),
            SyncStage::Failed {
                error: "operation canceled".to_string()
            }
        );
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SyncEvent::Started,
                SyncEvent::Failed {
                    error: "operation canceled".to_string()
                },
            ]
        );

        engine.sync().await.unwrap();
        assert_eq!(engine.stage(), SyncStage::Finished);
    }

    #[tokio::test]
    async fn update_count_advances_to_highest_usn() {
        let fx = Fixture::new();
        fx.remote.push_own_chunk(SyncChunk {
            tags: vec![Tag::new("a").with_guid("g1", 4)],
            ..SyncChunk::new().with_high_usn(9)
        });
        let engine = fx.engine(SyncConfig::new("test").with_send_local_changes(false));

        engine.sync().await.unwrap();
        engine.sync().await.unwrap();

        assert_eq!(
            fx.ledgers.update_count(&SyncScope::Own).await.unwrap(),
            Usn::new(9)
        );
        let fetches = fx.remote.fetches();
        assert_eq!(fetches[1], (SyncScope::Own, Usn::new(9)));
    }

    async fn put_dirty_tag(store: &MemoryStorage, name: &str) -> Tag {
        let mut tag = Tag::new(name);
        tag.locally_modified = true;
        store.put(tag.clone()).await.unwrap();
        tag
    }

    #[tokio::test]
    async fn transient_send_failure_is_retried() {
        let fx = Fixture::new();
        let draft = put_dirty_tag(&fx.store, "draft").await;
        fx.remote.fail_next_sends("connection reset", 2);
        let engine = fx.engine(SyncConfig::new("test"));

        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.send_failures, 0);
        let stored: Option<Tag> = fx.store.find_by_local_id(draft.local_id).await.unwrap();
        let stored = stored.unwrap();
        assert_eq!(stored.guid, Some(Guid::new("remote-1")));
        assert!(!stored.locally_modified);
    }

    #[tokio::test]
    async fn persistent_send_failure_is_abandoned() {
        let fx = Fixture::new();
        let draft = put_dirty_tag(&fx.store, "draft").await;
        fx.remote.fail_next_sends("service down", 10);
        let engine = fx.engine(SyncConfig::new("test"));

        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.send_failures, 1);
        assert!(fx.remote.sent().is_empty());
        let stored: Option<Tag> = fx.store.find_by_local_id(draft.local_id).await.unwrap();
        assert!(stored.unwrap().locally_modified);
    }

    #[tokio::test]
    async fn tag_cycle_does_not_block_other_kinds() {
        let fx = Fixture::new();
        fx.remote.push_own_chunk(SyncChunk {
            tags: vec![
                Tag::new("A").with_guid("A", 1).with_parent("B"),
                Tag::new("B").with_guid("B", 2).with_parent("A"),
            ],
            notebooks: vec![Notebook::new("Inbox").with_guid("nb1", 3)],
            ..SyncChunk::new()
        });
        let engine = fx.engine(SyncConfig::new("test"));

        let summary = engine.sync().await.unwrap();

        let own = summary.scope(&SyncScope::Own).unwrap();
        assert!(own.cycle.is_some());
        assert_eq!(own.progress(EntityKind::Notebook).added, 1);
        assert_eq!(fx.store.count(EntityKind::Tag), 0);
        assert_eq!(
            fx.ledgers.update_count(&SyncScope::Own).await.unwrap(),
            Usn::zero()
        );
    }

    #[tokio::test]
    async fn linked_entities_are_stamped_with_their_notebook() {
        let fx = Fixture::new();
        fx.remote
            .add_linked_notebook(LinkedNotebook::new("ln1", "Shared", "alice"));
        fx.remote.push_linked_chunk(
            "ln1",
            SyncChunk {
                notebooks: vec![Notebook::new("Shared").with_guid("nb9", 2)],
                ..SyncChunk::new()
            },
        );
        let engine = fx.engine(SyncConfig::new("test"));

        engine.sync().await.unwrap();

        let notebooks = fx.store.all::<Notebook>();
        assert_eq!(notebooks.len(), 1);
        assert_eq!(notebooks[0].linked_notebook_guid, Some(Guid::new("ln1")));
    }

    #[tokio::test]
    async fn linked_notebooks_can_be_turned_off() {
        let fx = Fixture::new();
        fx.remote
            .add_linked_notebook(LinkedNotebook::new("ln1", "Shared", "alice"));
        let engine = fx.engine(SyncConfig::new("test").with_linked_notebooks(false));

        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.scopes.len(), 1);
        assert!(fx
            .remote
            .fetches()
            .iter()
            .all(|(scope, _)| scope == &SyncScope::Own));
    }

    #[tokio::test]
    async fn expunged_linked_notebook_is_skipped_and_forgotten() {
        let fx = Fixture::new();
        fx.remote
            .add_linked_notebook(LinkedNotebook::new("ln1", "Shared", "alice"));
        fx.ledgers
            .set_update_count(&SyncScope::Linked(Guid::new("ln1")), Usn::new(3))
            .await
            .unwrap();
        fx.remote.push_own_chunk(SyncChunk {
            expunged_linked_notebooks: vec![Guid::new("ln1")],
            ..SyncChunk::new().with_high_usn(4)
        });
        let engine = fx.engine(SyncConfig::new("test"));

        let summary = engine.sync().await.unwrap();

        assert_eq!(summary.scopes.len(), 1);
        assert_eq!(
            fx.ledgers
                .update_count(&SyncScope::Linked(Guid::new("ln1")))
                .await
                .unwrap(),
            Usn::zero()
        );
    }

    #[tokio::test]
    async fn progress_callback_sees_scope_and_kind() {
        let fx = Fixture::new();
        fx.remote.push_own_chunk(SyncChunk {
            tags: vec![Tag::new("a").with_guid("g1", 1)],
            ..SyncChunk::new()
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let engine = fx
            .engine(SyncConfig::new("test"))
            .with_progress(Arc::new(move |scope: &SyncScope, kind: EntityKind, progress: Progress| {
                sink.lock()
                    .unwrap()
                    .push((scope.clone(), kind, progress.added));
            }));

        engine.sync().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(SyncScope::Own, EntityKind::Tag, 1)]
        );
    }
}
