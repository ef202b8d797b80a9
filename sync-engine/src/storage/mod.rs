//! Local store contract.
//!
//! The engine never touches the store's on-disk format; it only needs the
//! per-kind lookups and mutations of [`EntityStore`] plus a stream of
//! [`StorageEvent`]s describing every mutation.
//!
//! # Design
//!
//! - `find_by_guid()` / `find_by_local_id()` / `find_by_name()` look up
//! - `put()` inserts or overwrites by local id
//! - `expunge_by_guid()` deletes
//! - `subscribe()` yields a receiver of mutation notifications

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use sync_types::{Entity, EntityKind, Guid, LocalId, SyncEntity};
use tokio::sync::broadcast;

use crate::error::SyncResult;

/// Capacity of the mutation notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Mutation notification emitted by a store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    /// An entity was inserted or overwritten.
    Put(Entity),
    /// An entity was removed.
    Expunged {
        /// Kind of the removed entity.
        kind: EntityKind,
        /// Its local id.
        local_id: LocalId,
        /// Its guid, if it had one.
        guid: Option<Guid>,
    },
}

impl StorageEvent {
    /// Kind of the affected entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            StorageEvent::Put(entity) => entity.kind(),
            StorageEvent::Expunged { kind, .. } => *kind,
        }
    }
}

/// Async CRUD access to the entities of one kind.
#[async_trait]
pub trait EntityStore<K: SyncEntity>: Send + Sync {
    /// Find an entity by server guid.
    async fn find_by_guid(&self, guid: &Guid) -> SyncResult<Option<K>>;

    /// Find an entity by local id.
    async fn find_by_local_id(&self, id: LocalId) -> SyncResult<Option<K>>;

    /// Find an entity by exact name within a linked-notebook scope
    /// (`None` = owned by the account itself).
    async fn find_by_name(&self, name: &str, scope: Option<&Guid>) -> SyncResult<Option<K>>;

    /// Insert or overwrite an entity, keyed by local id.
    async fn put(&self, entity: K) -> SyncResult<()>;

    /// Remove the entity with this guid. Returns whether one existed.
    async fn expunge_by_guid(&self, guid: &Guid) -> SyncResult<bool>;

    /// Entities with unsent local edits.
    async fn find_locally_modified(&self) -> SyncResult<Vec<K>>;

    /// Subscribe to mutation notifications of this store.
    fn subscribe(&self) -> broadcast::Receiver<StorageEvent>;
}
