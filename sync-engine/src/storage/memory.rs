//! In-memory store for tests and tooling.
//!
//! Enforces the referential integrity a real note store would: tags point
//! at existing parents, notes at existing notebooks, resources at existing
//! notes. Guids are unique per kind.

use super::{EntityStore, StorageEvent, EVENT_CHANNEL_CAPACITY};
use crate::error::{SyncError, SyncResult};
use crate::lock;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use sync_types::{Entity, EntityKind, Guid, LocalId, SyncEntity};
use tokio::sync::broadcast;

/// In-memory entity store.
///
/// Clones share the same contents and notification channel.
#[derive(Debug)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
    events: broadcast::Sender<StorageEvent>,
}

#[derive(Debug, Default)]
struct MemoryStorageInner {
    entities: BTreeMap<(EntityKind, LocalId), Entity>,
    fail_next_put: Option<String>,
    fail_put_of: HashMap<Guid, String>,
    fail_next_expunge: Option<String>,
    lookups: usize,
}

impl MemoryStorageInner {
    fn all<K: SyncEntity>(&self) -> impl Iterator<Item = K> + '_ {
        self.entities
            .values()
            .filter(|e| e.kind() == K::KIND)
            .filter_map(|e| K::from_entity(e.clone()))
    }

    fn has(&self, kind: EntityKind, id: LocalId) -> bool {
        self.entities.contains_key(&(kind, id))
    }

    fn has_guid(&self, kind: EntityKind, guid: &Guid) -> bool {
        self.entities
            .values()
            .any(|e| e.kind() == kind && e.guid() == Some(guid))
    }

    fn check_references(&self, entity: &Entity) -> Result<(), String> {
        match entity {
            Entity::Tag(tag) => match tag.parent_local_id {
                Some(parent) if !self.has(EntityKind::Tag, parent) => {
                    Err(format!("parent tag {:?} does not exist", parent))
                }
                _ => Ok(()),
            },
            Entity::Note(note) => match (&note.notebook_local_id, &note.notebook_guid) {
                (Some(id), _) if self.has(EntityKind::Notebook, *id) => Ok(()),
                (None, Some(guid)) if self.has_guid(EntityKind::Notebook, guid) => Ok(()),
                _ => Err(format!(
                    "notebook of note {:?} does not exist",
                    note.local_id
                )),
            },
            Entity::Resource(resource) => match (&resource.note_local_id, &resource.note_guid) {
                (Some(id), _) if self.has(EntityKind::Note, *id) => Ok(()),
                (None, Some(guid)) if self.has_guid(EntityKind::Note, guid) => Ok(()),
                _ => Err(format!(
                    "note of resource {:?} does not exist",
                    resource.local_id
                )),
            },
            Entity::SavedSearch(_) | Entity::Notebook(_) => Ok(()),
        }
    }

    fn remove(&mut self, kind: EntityKind, id: LocalId, events: &mut Vec<StorageEvent>) {
        let Some(removed) = self.entities.remove(&(kind, id)) else {
            return;
        };
        let guid = removed.guid().cloned();

        let dependents: Vec<(EntityKind, LocalId)> = self
            .entities
            .values()
            .filter(|e| match (e, &removed) {
                (Entity::Note(note), Entity::Notebook(_)) => {
                    note.notebook_local_id == Some(id)
                        || (note.notebook_local_id.is_none()
                            && guid.is_some()
                            && note.notebook_guid == guid)
                }
                (Entity::Resource(resource), Entity::Note(_)) => {
                    resource.note_local_id == Some(id)
                        || (resource.note_local_id.is_none()
                            && guid.is_some()
                            && resource.note_guid == guid)
                }
                _ => false,
            })
            .map(|e| (e.kind(), e.local_id()))
            .collect();

        if let Entity::Tag(_) = removed {
            for entity in self.entities.values_mut() {
                if let Entity::Tag(child) = entity {
                    if child.parent_local_id == Some(id) {
                        child.parent_local_id = None;
                        child.parent_guid = None;
                        events.push(StorageEvent::Put(entity.clone()));
                    }
                }
            }
        }

        events.push(StorageEvent::Expunged {
            kind,
            local_id: id,
            guid,
        });
        for (kind, id) in dependents {
            self.remove(kind, id, events);
        }
    }
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner::default())),
            events,
        }
    }

    /// All stored entities of kind `K`.
    pub fn all<K: SyncEntity>(&self) -> Vec<K> {
        lock(&self.inner).all::<K>().collect()
    }

    /// Number of stored entities of a kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        lock(&self.inner)
            .entities
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Number of find calls served so far.
    pub fn lookup_count(&self) -> usize {
        lock(&self.inner).lookups
    }

    /// Cause the next put() to fail with the given error.
    pub fn fail_next_put(&self, error: &str) {
        lock(&self.inner).fail_next_put = Some(error.to_string());
    }

    /// Cause the next put() of the entity with this guid to fail.
    pub fn fail_put_of(&self, guid: &str, error: &str) {
        lock(&self.inner)
            .fail_put_of
            .insert(Guid::new(guid), error.to_string());
    }

    /// Cause the next expunge_by_guid() to fail with the given error.
    pub fn fail_next_expunge(&self, error: &str) {
        lock(&self.inner).fail_next_expunge = Some(error.to_string());
    }

    fn publish(&self, events: Vec<StorageEvent>) {
        for event in events {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStorage {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
        }
    }
}

#[async_trait]
impl<K: SyncEntity> EntityStore<K> for MemoryStorage {
    async fn find_by_guid(&self, guid: &Guid) -> SyncResult<Option<K>> {
        let mut inner = lock(&self.inner);
        inner.lookups += 1;
        let found = inner.all::<K>().find(|e| e.guid() == Some(guid));
        Ok(found)
    }

    async fn find_by_local_id(&self, id: LocalId) -> SyncResult<Option<K>> {
        let mut inner = lock(&self.inner);
        inner.lookups += 1;
        Ok(inner
            .entities
            .get(&(K::KIND, id))
            .cloned()
            .and_then(K::from_entity))
    }

    async fn find_by_name(&self, name: &str, scope: Option<&Guid>) -> SyncResult<Option<K>> {
        let mut inner = lock(&self.inner);
        inner.lookups += 1;
        let found = inner
            .all::<K>()
            .find(|e| e.name() == Some(name) && e.linked_notebook_guid() == scope);
        Ok(found)
    }

    async fn put(&self, entity: K) -> SyncResult<()> {
        let entity = entity.into_entity();
        let event = {
            let mut inner = lock(&self.inner);
            if let Some(error) = inner.fail_next_put.take() {
                return Err(SyncError::Storage(error));
            }
            if let Some(guid) = entity.guid() {
                if let Some(error) = inner.fail_put_of.remove(guid) {
                    return Err(SyncError::Storage(error));
                }
                let taken = inner.entities.values().any(|e| {
                    e.kind() == K::KIND && e.guid() == Some(guid) && e.local_id() != entity.local_id()
                });
                if taken {
                    return Err(SyncError::Storage(format!(
                        "{} guid {} already belongs to another entity",
                        K::KIND,
                        guid
                    )));
                }
            }
            inner
                .check_references(&entity)
                .map_err(SyncError::Storage)?;
            inner
                .entities
                .insert((K::KIND, entity.local_id()), entity.clone());
            StorageEvent::Put(entity)
        };
        self.publish(vec![event]);
        Ok(())
    }

    async fn expunge_by_guid(&self, guid: &Guid) -> SyncResult<bool> {
        let mut events = Vec::new();
        {
            let mut inner = lock(&self.inner);
            if let Some(error) = inner.fail_next_expunge.take() {
                return Err(SyncError::Storage(error));
            }
            let target = inner
                .entities
                .values()
                .find(|e| e.kind() == K::KIND && e.guid() == Some(guid))
                .map(|e| e.local_id());
            match target {
                Some(id) => inner.remove(K::KIND, id, &mut events),
                None => return Ok(false),
            }
        }
        self.publish(events);
        Ok(true)
    }

    async fn find_locally_modified(&self) -> SyncResult<Vec<K>> {
        let mut inner = lock(&self.inner);
        inner.lookups += 1;
        let dirty = inner.all::<K>().filter(|e| e.is_locally_modified()).collect();
        Ok(dirty)
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}
