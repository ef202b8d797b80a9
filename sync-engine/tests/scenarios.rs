//! End-to-end behavior of the sync engine against in-memory collaborators.

use notesync_engine::{
    ConflictResolution, ConflictResolver, DurableProcessor, EntityStore, LedgerStore,
    MemorySettingsBackend, MemoryStorage, MockDownloader, MockRemote, NotebookFinder, NoteLinker,
    Stores, SyncChunkProcessor, SyncConfig, SyncEngine, SyncError, SyncScope, TagFinder,
    TagLinker,
};
use std::sync::Arc;
use sync_core::{conflicting_name, TopologicalSorter};
use sync_types::{
    Entity, EntityKind, Guid, LinkedNotebook, Note, Notebook, Resource, SyncChunk, Tag, Usn,
};

fn ledgers() -> Arc<LedgerStore> {
    Arc::new(LedgerStore::new(Arc::new(MemorySettingsBackend::new())))
}

fn durable_tags(store: &MemoryStorage, ledgers: &Arc<LedgerStore>) -> DurableProcessor<Tag> {
    let tags: Arc<dyn EntityStore<Tag>> = Arc::new(store.clone());
    let finder = Arc::new(TagFinder::new(Arc::clone(&tags)));
    let processor = SyncChunkProcessor::new(tags).with_linker(Arc::new(TagLinker::new(finder)));
    DurableProcessor::new(processor, Arc::clone(ledgers), SyncScope::Own)
}

fn durable_notes(
    store: &MemoryStorage,
    ledgers: &Arc<LedgerStore>,
    downloader: &MockDownloader,
) -> DurableProcessor<Note> {
    let notes: Arc<dyn EntityStore<Note>> = Arc::new(store.clone());
    let notebooks: Arc<dyn EntityStore<Notebook>> = Arc::new(store.clone());
    let finder = Arc::new(NotebookFinder::new(notebooks, Arc::clone(&notes)));
    let processor = SyncChunkProcessor::new(notes)
        .with_linker(Arc::new(NoteLinker::new(finder)))
        .with_downloader(Arc::new(downloader.clone()));
    DurableProcessor::new(processor, Arc::clone(ledgers), SyncScope::Own)
}

fn tag_resolver(store: &MemoryStorage) -> Arc<ConflictResolver<Tag>> {
    ConflictResolver::new(Arc::new(store.clone()))
}

// ===========================================
// Idempotence and expunge-wins
// ===========================================

#[tokio::test]
async fn replaying_a_chunk_changes_nothing() {
    let store = MemoryStorage::new();
    let ledgers = ledgers();
    let processor = durable_tags(&store, &ledgers);
    let chunk = SyncChunk {
        tags: vec![
            Tag::new("parent").with_guid("p", 1),
            Tag::new("child").with_guid("c", 2).with_parent("p"),
        ],
        ..SyncChunk::new()
    };

    let first = processor.process_durable(&[chunk.clone()], None).await.unwrap();
    let after_first = store.all::<Tag>();
    let second = processor.process_durable(&[chunk], None).await.unwrap();

    assert_eq!(first.progress.added, 2);
    assert_eq!(second.progress.added, 0);
    assert_eq!(second.progress.updated, 0);
    assert_eq!(store.all::<Tag>(), after_first);
    let ledger = ledgers.load::<Tag>(&SyncScope::Own).await.unwrap();
    assert_eq!(ledger.processed.len(), 2);
}

#[tokio::test]
async fn expunged_guid_is_never_stored() {
    let store = MemoryStorage::new();
    let ledgers = ledgers();
    let chunk = SyncChunk {
        tags: vec![Tag::new("gone").with_guid("g1", 3), Tag::new("kept").with_guid("g2", 4)],
        expunged_tags: vec![Guid::new("g1")],
        ..SyncChunk::new()
    };

    let status = durable_tags(&store, &ledgers)
        .process_durable(&[chunk], None)
        .await
        .unwrap();

    assert_eq!(status.progress.added, 1);
    assert_eq!(status.progress.updated, 0);
    assert_eq!(status.progress.expunged, 1);
    let tags = store.all::<Tag>();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].guid, Some(Guid::new("g2")));
}

// ===========================================
// Conflict resolution
// ===========================================

#[tokio::test]
async fn every_valid_pair_resolves() {
    let store = MemoryStorage::new();
    let resolver = tag_resolver(&store);
    let notes: Arc<ConflictResolver<Note>> = ConflictResolver::new(Arc::new(store.clone()));

    for same_guid in [true, false] {
        for same_name in [true, false] {
            for same_scope in [true, false] {
                for dirty in [true, false] {
                    let theirs = Tag::new("Work").with_guid("g1", 5);
                    let mut mine = Tag::new(if same_name { "Work" } else { "Other" })
                        .with_guid(if same_guid { "g1" } else { "g2" }, 2);
                    if !same_scope {
                        mine.linked_notebook_guid = Some(Guid::new("ln1"));
                    }
                    mine.locally_modified = dirty;
                    assert!(resolver.resolve(theirs, mine).await.is_ok());

                    let theirs = Note::remote("n1", 5, "Plan", "nb1");
                    let mut mine = Note::remote(
                        if same_guid { "n1" } else { "n2" },
                        2,
                        if same_name { "Plan" } else { "Other" },
                        "nb1",
                    );
                    mine.locally_modified = dirty;
                    assert!(notes.resolve(theirs, mine).await.is_ok());
                }
            }
        }
    }
}

#[tokio::test]
async fn same_name_different_guid_moves_local_tag() {
    let store = MemoryStorage::new();
    let mine = Tag::new("Work").with_guid("g2", 1);
    store.put(mine.clone()).await.unwrap();

    let resolution = tag_resolver(&store)
        .resolve(Tag::new("Work").with_guid("g1", 2), mine.clone())
        .await
        .unwrap();

    let mut expected = mine;
    expected.name = Some("Work - conflicting".to_string());
    expected.locally_modified = true;
    assert_eq!(resolution, ConflictResolution::MoveMine(expected));
}

#[tokio::test]
async fn renaming_takes_n_plus_one_probes() {
    for taken in 0..5u32 {
        let store = MemoryStorage::new();
        let mine = Tag::new("Work").with_guid("g2", 1);
        store.put(mine.clone()).await.unwrap();
        for attempt in 1..=taken {
            store
                .put(Tag::new(&conflicting_name("Work", attempt)))
                .await
                .unwrap();
        }
        let before = store.lookup_count();

        let resolution = tag_resolver(&store)
            .resolve(Tag::new("Work").with_guid("g1", 2), mine)
            .await
            .unwrap();

        let ConflictResolution::MoveMine(copy) = resolution else {
            panic!("expected MoveMine with {} names taken", taken);
        };
        let name = copy.name.unwrap();
        assert_eq!(name, conflicting_name("Work", taken + 1));
        assert_eq!(store.lookup_count() - before, taken as usize + 1);
        let clash: Option<Tag> = store.find_by_name(&name, None).await.unwrap();
        assert!(clash.is_none());
    }
}

#[tokio::test]
async fn precondition_violation_is_the_only_error() {
    let store = MemoryStorage::new();
    let err = tag_resolver(&store)
        .resolve(Tag::new("Work"), Tag::new("Work").with_guid("g1", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidArgument(_)));
}

// ===========================================
// Ordering
// ===========================================

#[test]
fn two_tag_cycle_is_reported_with_both_ids() {
    let err = TopologicalSorter::new()
        .sort(&[
            ("A".to_string(), Some("B".to_string())),
            ("B".to_string(), Some("A".to_string())),
        ])
        .unwrap_err();

    assert!(err.chain.contains(&"A".to_string()));
    assert!(err.chain.contains(&"B".to_string()));
}

#[test]
fn acyclic_set_puts_parents_first() {
    let nodes = vec![
        ("d".to_string(), Some("b".to_string())),
        ("b".to_string(), Some("a".to_string())),
        ("c".to_string(), Some("a".to_string())),
        ("a".to_string(), None),
    ];
    let order = TopologicalSorter::new().sort(&nodes).unwrap();

    assert_eq!(order.len(), 4);
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
}

// ===========================================
// Durable processing
// ===========================================

#[tokio::test]
async fn processed_usn_decides_reprocessing() {
    let store = MemoryStorage::new();
    let ledgers = ledgers();
    let processor = durable_tags(&store, &ledgers);
    let at = |usn| SyncChunk {
        tags: vec![Tag::new("a").with_guid("g1", usn)],
        ..SyncChunk::new()
    };

    processor.process_durable(&[at(5)], None).await.unwrap();
    let same = processor.process_durable(&[at(5)], None).await.unwrap();
    let newer = processor.process_durable(&[at(6)], None).await.unwrap();

    assert_eq!(same.progress.total, 0);
    assert_eq!(newer.progress.updated, 1);
    let ledger = ledgers.load::<Tag>(&SyncScope::Own).await.unwrap();
    assert_eq!(ledger.processed.get(&Guid::new("g1")), Some(&Usn::new(6)));
}

#[tokio::test]
async fn failed_download_is_replayed_before_new_work() {
    let store = MemoryStorage::new();
    let ledgers = ledgers();
    store
        .put(Notebook::new("Inbox").with_guid("nb1", 1))
        .await
        .unwrap();
    let downloader = MockDownloader::new();
    downloader.fail_download_of("g3", "connection reset");

    let processor = durable_notes(&store, &ledgers, &downloader);
    let first = processor
        .process_durable(
            &[SyncChunk {
                notes: vec![Note::remote("g3", 3, "Three", "nb1")],
                ..SyncChunk::new()
            }],
            None,
        )
        .await
        .unwrap();
    assert_eq!(first.failed_to_download.len(), 1);

    let second = processor
        .process_durable(
            &[SyncChunk {
                notes: vec![Note::remote("g7", 7, "Seven", "nb1")],
                ..SyncChunk::new()
            }],
            None,
        )
        .await
        .unwrap();

    assert_eq!(downloader.downloaded(), vec![Guid::new("g3"), Guid::new("g7")]);
    assert_eq!(second.progress.added, 2);
    let ledger = ledgers.load::<Note>(&SyncScope::Own).await.unwrap();
    assert!(ledger.failed_to_download.is_empty());
    assert_eq!(ledger.processed.get(&Guid::new("g3")), Some(&Usn::new(3)));
}

// ===========================================
// Full sessions
// ===========================================

#[tokio::test]
async fn full_session_downloads_resolves_and_sends() {
    let store = MemoryStorage::new();
    let remote = MockRemote::new();
    let ledgers = ledgers();
    let downloader = MockDownloader::new();

    let local_work = Tag::new("Work").with_guid("g2", 1);
    store.put(local_work.clone()).await.unwrap();

    remote.push_own_chunk(SyncChunk {
        notebooks: vec![Notebook::new("Inbox").with_guid("nb1", 1)],
        tags: vec![
            Tag::new("Project").with_guid("g5", 3).with_parent("g1"),
            Tag::new("Work").with_guid("g1", 2),
        ],
        notes: vec![Note::remote("n1", 4, "Plan", "nb1")],
        resources: vec![Resource::remote("r1", 5, "a.png", "n1")],
        ..SyncChunk::new()
    });
    remote.add_linked_notebook(LinkedNotebook::new("ln1", "Shared", "alice"));
    remote.push_linked_chunk(
        "ln1",
        SyncChunk {
            notebooks: vec![Notebook::new("Shared").with_guid("nb9", 7)],
            notes: vec![Note::remote("n9", 8, "Shared note", "nb9")],
            ..SyncChunk::new()
        },
    );

    let engine = SyncEngine::new(
        SyncConfig::new("alice"),
        Stores::shared(store.clone()),
        Arc::new(remote.clone()),
        Arc::clone(&ledgers),
    )
    .with_note_downloader(Arc::new(downloader.clone()))
    .with_resource_downloader(Arc::new(downloader.clone()));

    let summary = engine.sync().await.unwrap();

    let own = summary.scope(&SyncScope::Own).unwrap();
    assert_eq!(own.progress(EntityKind::Tag).added, 2);
    assert_eq!(own.progress(EntityKind::Notebook).added, 1);
    assert_eq!(own.progress(EntityKind::Note).added, 1);
    assert_eq!(own.progress(EntityKind::Resource).added, 1);
    assert_eq!(own.failures, 0);
    let linked = summary.scope(&SyncScope::Linked(Guid::new("ln1"))).unwrap();
    assert_eq!(linked.progress(EntityKind::Note).added, 1);

    let tags = store.all::<Tag>();
    let by_name = |name: &str| tags.iter().find(|t| t.name.as_deref() == Some(name)).unwrap();
    let renamed = by_name("Work - conflicting");
    assert_eq!(renamed.local_id, local_work.local_id);
    assert!(!renamed.locally_modified);
    assert_eq!(by_name("Project").parent_local_id, Some(by_name("Work").local_id));

    let notes = store.all::<Note>();
    let plan = notes.iter().find(|n| n.guid == Some(Guid::new("n1"))).unwrap();
    assert_eq!(plan.content.as_deref(), Some("<en-note>Plan</en-note>"));

    assert_eq!(summary.sent, 1);
    let sent = remote.sent();
    assert_eq!(sent[0].0, SyncScope::Own);
    assert!(matches!(&sent[0].1, Entity::Tag(t) if t.name.as_deref() == Some("Work - conflicting")));

    // A local note in the shared notebook goes to the linked scope.
    let shared = store
        .all::<Notebook>()
        .into_iter()
        .find(|nb| nb.guid == Some(Guid::new("nb9")))
        .unwrap();
    assert_eq!(shared.linked_notebook_guid, Some(Guid::new("ln1")));
    let mut draft = Note::new("Draft", &shared);
    draft.locally_modified = true;
    store.put(draft.clone()).await.unwrap();

    let summary = engine.sync().await.unwrap();

    assert_eq!(summary.sent, 1);
    let sent = remote.sent();
    assert_eq!(sent[1].0, SyncScope::Linked(Guid::new("ln1")));
    let stored: Option<Note> = store.find_by_local_id(draft.local_id).await.unwrap();
    let stored = stored.unwrap();
    assert_eq!(stored.guid, Some(Guid::new("remote-1")));
    assert!(!stored.locally_modified);

    let fetches = remote.fetches();
    assert!(fetches.contains(&(SyncScope::Own, Usn::new(5))));
    assert!(fetches.contains(&(SyncScope::Linked(Guid::new("ln1")), Usn::new(8))));
}

#[tokio::test]
async fn interrupted_session_resumes_from_the_ledger() {
    let store = MemoryStorage::new();
    let remote = MockRemote::new();
    let ledgers = ledgers();
    let downloader = MockDownloader::new();
    downloader.rate_limit_download_of("n1");

    remote.push_own_chunk(SyncChunk {
        notebooks: vec![Notebook::new("Inbox").with_guid("nb1", 1)],
        notes: vec![
            Note::remote("n1", 2, "One", "nb1"),
            Note::remote("n2", 3, "Two", "nb1"),
        ],
        ..SyncChunk::new()
    });
    let engine = SyncEngine::new(
        SyncConfig::new("alice"),
        Stores::shared(store.clone()),
        Arc::new(remote.clone()),
        Arc::clone(&ledgers),
    )
    .with_note_downloader(Arc::new(downloader.clone()));

    let first = engine.sync().await.unwrap();
    let own = first.scope(&SyncScope::Own).unwrap();
    assert_eq!(own.progress(EntityKind::Note).added, 0);
    assert_eq!(own.failures, 2);
    assert_eq!(store.count(EntityKind::Note), 0);

    let second = engine.sync().await.unwrap();
    let own = second.scope(&SyncScope::Own).unwrap();
    assert_eq!(own.progress(EntityKind::Note).added, 2);
    assert_eq!(store.count(EntityKind::Note), 2);
    let ledger = ledgers.load::<Note>(&SyncScope::Own).await.unwrap();
    assert_eq!(ledger.pending_failures(), 0);
}
