//! Memoizing lookups that stay consistent with live mutations.
//!
//! A finder caches the result of every storage lookup, including an
//! explicit "absent" marker so repeated negative lookups stay cheap. It
//! subscribes to the store's [`StorageEvent`] stream at construction and
//! drains it before every lookup, invalidating entries the mutation could
//! have made stale. Dropping the finder drops the subscription.
//!
//! A lookup that raced with a mutation (the event arrived while the store
//! round-trip was in flight) returns its result without caching it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sync_types::{EntityKind, Guid, LocalId, Note, Notebook, SyncEntity, Tag};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::error::SyncResult;
use crate::lock;
use crate::storage::{EntityStore, StorageEvent};

/// Cached lookup result.
#[derive(Debug, Clone, PartialEq)]
enum CacheEntry<V> {
    Found(V),
    Absent,
}

impl<V: Clone> CacheEntry<V> {
    fn from_option(value: Option<V>) -> Self {
        match value {
            Some(v) => CacheEntry::Found(v),
            None => CacheEntry::Absent,
        }
    }

    fn value(&self) -> Option<V> {
        match self {
            CacheEntry::Found(v) => Some(v.clone()),
            CacheEntry::Absent => None,
        }
    }
}

/// Receiver side of one or more mutation streams.
struct Subscription {
    receivers: Vec<broadcast::Receiver<StorageEvent>>,
}

impl Subscription {
    /// Pull every pending event. `None` in the output means events were
    /// lost and everything must be dropped.
    fn drain(&mut self) -> Vec<Option<StorageEvent>> {
        let mut events = Vec::new();
        for rx in &mut self.receivers {
            loop {
                match rx.try_recv() {
                    Ok(event) => events.push(Some(event)),
                    Err(TryRecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Finder lagged behind storage events");
                        events.push(None);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        events
    }
}

struct EntityCache<K> {
    by_local_id: HashMap<LocalId, CacheEntry<K>>,
    by_guid: HashMap<Guid, CacheEntry<K>>,
    subscription: Subscription,
    generation: u64,
}

impl<K: SyncEntity> EntityCache<K> {
    fn sync(&mut self) {
        for event in self.subscription.drain() {
            match event {
                None => self.clear(),
                Some(StorageEvent::Put(entity)) if entity.kind() == K::KIND => {
                    let guid = entity.guid().cloned();
                    self.invalidate(entity.local_id(), guid.as_ref());
                }
                Some(StorageEvent::Expunged {
                    kind,
                    local_id,
                    guid,
                }) if kind == K::KIND => self.invalidate(local_id, guid.as_ref()),
                Some(_) => {}
            }
        }
    }

    fn invalidate(&mut self, local_id: LocalId, guid: Option<&Guid>) {
        self.by_local_id.remove(&local_id);
        if let Some(guid) = guid {
            self.by_guid.remove(guid);
        }
        // The entity may have been cached under a guid it no longer has.
        self.by_guid.retain(|_, entry| match entry {
            CacheEntry::Found(e) => e.local_id() != local_id,
            CacheEntry::Absent => true,
        });
        self.generation += 1;
        tracing::trace!(kind = %K::KIND, ?local_id, "Finder entry invalidated");
    }

    fn clear(&mut self) {
        self.by_local_id.clear();
        self.by_guid.clear();
        self.generation += 1;
    }

    fn remember(&mut self, found: &Option<K>) {
        if let Some(entity) = found {
            self.by_local_id
                .insert(entity.local_id(), CacheEntry::Found(entity.clone()));
            if let Some(guid) = entity.guid() {
                self.by_guid
                    .insert(guid.clone(), CacheEntry::Found(entity.clone()));
            }
        }
    }
}

/// Cached lookups of one entity kind by local id and by guid.
pub struct EntityFinder<K: SyncEntity> {
    store: Arc<dyn EntityStore<K>>,
    cache: Mutex<EntityCache<K>>,
}

/// Finder for notes.
pub type NoteFinder = EntityFinder<Note>;

/// Finder for tags.
pub type TagFinder = EntityFinder<Tag>;

impl<K: SyncEntity> EntityFinder<K> {
    /// Create a finder over a store, subscribing to its mutations.
    pub fn new(store: Arc<dyn EntityStore<K>>) -> Self {
        let subscription = Subscription {
            receivers: vec![store.subscribe()],
        };
        Self {
            store,
            cache: Mutex::new(EntityCache {
                by_local_id: HashMap::new(),
                by_guid: HashMap::new(),
                subscription,
                generation: 0,
            }),
        }
    }

    /// Find an entity by local id.
    pub async fn find_by_local_id(&self, id: LocalId) -> SyncResult<Option<K>> {
        let generation = {
            let mut cache = lock(&self.cache);
            cache.sync();
            if let Some(entry) = cache.by_local_id.get(&id) {
                return Ok(entry.value());
            }
            cache.generation
        };

        let found = self.store.find_by_local_id(id).await?;

        let mut cache = lock(&self.cache);
        cache.sync();
        if cache.generation == generation {
            cache.remember(&found);
            if found.is_none() {
                cache.by_local_id.insert(id, CacheEntry::Absent);
            }
        }
        Ok(found)
    }

    /// Find an entity by guid.
    pub async fn find_by_guid(&self, guid: &Guid) -> SyncResult<Option<K>> {
        let generation = {
            let mut cache = lock(&self.cache);
            cache.sync();
            if let Some(entry) = cache.by_guid.get(guid) {
                return Ok(entry.value());
            }
            cache.generation
        };

        let found = self.store.find_by_guid(guid).await?;

        let mut cache = lock(&self.cache);
        cache.sync();
        if cache.generation == generation {
            cache.remember(&found);
            if found.is_none() {
                cache.by_guid.insert(guid.clone(), CacheEntry::Absent);
            }
        }
        Ok(found)
    }

    /// Number of cached entries, found or absent.
    pub fn cached_entries(&self) -> usize {
        let mut cache = lock(&self.cache);
        cache.sync();
        cache.by_local_id.len() + cache.by_guid.len()
    }
}

struct NoteNotebookCache {
    notebook_of_note: HashMap<LocalId, CacheEntry<LocalId>>,
    subscription: Subscription,
    generation: u64,
}

impl NoteNotebookCache {
    fn sync(&mut self) {
        for event in self.subscription.drain() {
            match event {
                None => {
                    self.notebook_of_note.clear();
                    self.generation += 1;
                }
                Some(StorageEvent::Put(entity)) => match entity.kind() {
                    EntityKind::Note => self.forget_note(entity.local_id()),
                    // A notebook appearing can resolve a note that pointed at
                    // an unknown notebook guid.
                    EntityKind::Notebook => self.forget_absent(),
                    _ => {}
                },
                Some(StorageEvent::Expunged { kind, local_id, .. }) => match kind {
                    EntityKind::Note => self.forget_note(local_id),
                    EntityKind::Notebook => self.forget_notebook(local_id),
                    _ => {}
                },
            }
        }
    }

    fn forget_note(&mut self, note: LocalId) {
        if self.notebook_of_note.remove(&note).is_some() {
            self.generation += 1;
        }
    }

    fn forget_absent(&mut self) {
        self.notebook_of_note
            .retain(|_, entry| !matches!(entry, CacheEntry::Absent));
        self.generation += 1;
    }

    fn forget_notebook(&mut self, notebook: LocalId) {
        self.notebook_of_note
            .retain(|_, entry| entry != &CacheEntry::Found(notebook));
        self.generation += 1;
    }
}

/// Cached lookups of notebooks, including the notebook a note lives in.
///
/// The note → notebook relation is cached separately from the notebooks
/// themselves, so "is this note in a linked notebook" is answered from
/// two cached hops and invalidating either hop recomputes only that hop.
pub struct NotebookFinder {
    notebooks: EntityFinder<Notebook>,
    notes: Arc<dyn EntityStore<Note>>,
    relation: Mutex<NoteNotebookCache>,
}

impl NotebookFinder {
    /// Create a finder over the notebook and note stores.
    pub fn new(notebooks: Arc<dyn EntityStore<Notebook>>, notes: Arc<dyn EntityStore<Note>>) -> Self {
        let subscription = Subscription {
            receivers: vec![notes.subscribe(), notebooks.subscribe()],
        };
        Self {
            notebooks: EntityFinder::new(notebooks),
            notes,
            relation: Mutex::new(NoteNotebookCache {
                notebook_of_note: HashMap::new(),
                subscription,
                generation: 0,
            }),
        }
    }

    /// Find a notebook by local id.
    pub async fn find_by_local_id(&self, id: LocalId) -> SyncResult<Option<Notebook>> {
        self.notebooks.find_by_local_id(id).await
    }

    /// Find a notebook by guid.
    pub async fn find_by_guid(&self, guid: &Guid) -> SyncResult<Option<Notebook>> {
        self.notebooks.find_by_guid(guid).await
    }

    /// Find the notebook the note with this local id lives in.
    pub async fn find_notebook_of_note(&self, note: LocalId) -> SyncResult<Option<Notebook>> {
        let (cached, generation) = {
            let mut relation = lock(&self.relation);
            relation.sync();
            (relation.notebook_of_note.get(&note).cloned(), relation.generation)
        };
        match cached {
            Some(CacheEntry::Found(notebook)) => return self.notebooks.find_by_local_id(notebook).await,
            Some(CacheEntry::Absent) => return Ok(None),
            None => {}
        }

        let notebook = match self.notes.find_by_local_id(note).await? {
            Some(Note {
                notebook_local_id: Some(id),
                ..
            }) => self.notebooks.find_by_local_id(id).await?,
            Some(Note {
                notebook_guid: Some(guid),
                ..
            }) => self.notebooks.find_by_guid(&guid).await?,
            _ => None,
        };

        let mut relation = lock(&self.relation);
        relation.sync();
        if relation.generation == generation {
            relation.notebook_of_note.insert(
                note,
                CacheEntry::from_option(notebook.as_ref().map(|n| n.local_id)),
            );
        }
        Ok(notebook)
    }

    /// Guid of the linked notebook owning the note's notebook, if any.
    pub async fn find_linked_notebook_guid_of_note(&self, note: LocalId) -> SyncResult<Option<Guid>> {
        Ok(self
            .find_notebook_of_note(note)
            .await?
            .and_then(|notebook| notebook.linked_notebook_guid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn tag_finder(store: &MemoryStorage) -> TagFinder {
        EntityFinder::new(Arc::new(store.clone()))
    }

    fn notebook_finder(store: &MemoryStorage) -> NotebookFinder {
        NotebookFinder::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    // ===========================================
    // EntityFinder
    // ===========================================

    #[tokio::test]
    async fn hit_does_not_touch_storage() {
        let store = MemoryStorage::new();
        store.put(Tag::new("Work").with_guid("g1", 1)).await.unwrap();
        let finder = tag_finder(&store);

        let first = finder.find_by_guid(&Guid::new("g1")).await.unwrap();
        let lookups = store.lookup_count();
        let second = finder.find_by_guid(&Guid::new("g1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.lookup_count(), lookups);
    }

    #[tokio::test]
    async fn found_entity_is_cached_under_both_keys() {
        let store = MemoryStorage::new();
        let tag = Tag::new("Work").with_guid("g1", 1);
        store.put(tag.clone()).await.unwrap();
        let finder = tag_finder(&store);

        finder.find_by_guid(&Guid::new("g1")).await.unwrap();
        let lookups = store.lookup_count();
        let by_id = finder.find_by_local_id(tag.local_id).await.unwrap();

        assert_eq!(by_id, Some(tag));
        assert_eq!(store.lookup_count(), lookups);
    }

    #[tokio::test]
    async fn absence_is_cached_until_put() {
        let store = MemoryStorage::new();
        let finder = tag_finder(&store);

        assert!(finder.find_by_guid(&Guid::new("g1")).await.unwrap().is_none());
        let lookups = store.lookup_count();
        assert!(finder.find_by_guid(&Guid::new("g1")).await.unwrap().is_none());
        assert_eq!(store.lookup_count(), lookups);

        store.put(Tag::new("Work").with_guid("g1", 1)).await.unwrap();
        assert!(finder.find_by_guid(&Guid::new("g1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_replaces_stale_value() {
        let store = MemoryStorage::new();
        let mut tag = Tag::new("Work").with_guid("g1", 1);
        store.put(tag.clone()).await.unwrap();
        let finder = tag_finder(&store);
        finder.find_by_local_id(tag.local_id).await.unwrap();

        tag.name = Some("Office".into());
        store.put(tag.clone()).await.unwrap();

        let found = finder.find_by_local_id(tag.local_id).await.unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("Office"));
    }

    #[tokio::test]
    async fn guid_change_drops_old_guid_entry() {
        let store = MemoryStorage::new();
        let mut tag = Tag::new("Work").with_guid("old", 1);
        store.put(tag.clone()).await.unwrap();
        let finder = tag_finder(&store);
        finder.find_by_guid(&Guid::new("old")).await.unwrap();

        tag.guid = Some(Guid::new("new"));
        store.put(tag).await.unwrap();

        assert!(finder.find_by_guid(&Guid::new("old")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expunge_invalidates() {
        let store = MemoryStorage::new();
        store.put(Tag::new("Work").with_guid("g1", 1)).await.unwrap();
        let finder = tag_finder(&store);
        assert!(finder.find_by_guid(&Guid::new("g1")).await.unwrap().is_some());

        EntityStore::<Tag>::expunge_by_guid(&store, &Guid::new("g1"))
            .await
            .unwrap();

        assert!(finder.find_by_guid(&Guid::new("g1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_kinds_do_not_invalidate() {
        let store = MemoryStorage::new();
        store.put(Tag::new("Work").with_guid("g1", 1)).await.unwrap();
        let finder = tag_finder(&store);
        finder.find_by_guid(&Guid::new("g1")).await.unwrap();
        let cached = finder.cached_entries();

        store.put(Notebook::new("Inbox").with_guid("nb1", 1)).await.unwrap();
        assert_eq!(finder.cached_entries(), cached);
    }

    // ===========================================
    // NotebookFinder
    // ===========================================

    #[tokio::test]
    async fn two_hop_linked_guid_is_cached() {
        let store = MemoryStorage::new();
        let notebook = Notebook::new("Shared")
            .with_guid("nb1", 1)
            .with_linked_notebook("ln1");
        store.put(notebook.clone()).await.unwrap();
        let note = Note::new("Hello", &notebook);
        store.put(note.clone()).await.unwrap();
        let finder = notebook_finder(&store);

        let linked = finder
            .find_linked_notebook_guid_of_note(note.local_id)
            .await
            .unwrap();
        assert_eq!(linked, Some(Guid::new("ln1")));

        let lookups = store.lookup_count();
        finder
            .find_linked_notebook_guid_of_note(note.local_id)
            .await
            .unwrap();
        assert_eq!(store.lookup_count(), lookups);
    }

    #[tokio::test]
    async fn moving_note_invalidates_first_hop() {
        let store = MemoryStorage::new();
        let own = Notebook::new("Own").with_guid("nb1", 1);
        let shared = Notebook::new("Shared")
            .with_guid("nb2", 2)
            .with_linked_notebook("ln1");
        store.put(own.clone()).await.unwrap();
        store.put(shared.clone()).await.unwrap();
        let mut note = Note::new("Hello", &own);
        store.put(note.clone()).await.unwrap();
        let finder = notebook_finder(&store);
        assert_eq!(
            finder.find_linked_notebook_guid_of_note(note.local_id).await.unwrap(),
            None
        );

        note.notebook_local_id = Some(shared.local_id);
        note.notebook_guid = shared.guid.clone();
        store.put(note.clone()).await.unwrap();

        assert_eq!(
            finder.find_linked_notebook_guid_of_note(note.local_id).await.unwrap(),
            Some(Guid::new("ln1"))
        );
    }

    #[tokio::test]
    async fn changing_notebook_invalidates_second_hop() {
        let store = MemoryStorage::new();
        let mut notebook = Notebook::new("Inbox").with_guid("nb1", 1);
        store.put(notebook.clone()).await.unwrap();
        let note = Note::new("Hello", &notebook);
        store.put(note.clone()).await.unwrap();
        let finder = notebook_finder(&store);
        finder.find_notebook_of_note(note.local_id).await.unwrap();

        notebook.linked_notebook_guid = Some(Guid::new("ln9"));
        store.put(notebook).await.unwrap();

        assert_eq!(
            finder.find_linked_notebook_guid_of_note(note.local_id).await.unwrap(),
            Some(Guid::new("ln9"))
        );
    }

    #[tokio::test]
    async fn expunged_notebook_cascades_to_relation() {
        let store = MemoryStorage::new();
        let notebook = Notebook::new("Inbox").with_guid("nb1", 1);
        store.put(notebook.clone()).await.unwrap();
        let note = Note::new("Hello", &notebook);
        store.put(note.clone()).await.unwrap();
        let finder = notebook_finder(&store);
        assert!(finder.find_notebook_of_note(note.local_id).await.unwrap().is_some());

        EntityStore::<Notebook>::expunge_by_guid(&store, &Guid::new("nb1"))
            .await
            .unwrap();

        assert!(finder.find_notebook_of_note(note.local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn note_resolved_by_notebook_guid() {
        let store = MemoryStorage::new();
        store.put(Notebook::new("Inbox").with_guid("nb1", 1)).await.unwrap();
        let note = Note::remote("n1", 2, "Hello", "nb1");
        store.put(note.clone()).await.unwrap();
        let finder = notebook_finder(&store);

        let notebook = finder.find_notebook_of_note(note.local_id).await.unwrap();
        assert_eq!(notebook.and_then(|n| n.guid), Some(Guid::new("nb1")));
    }
}
