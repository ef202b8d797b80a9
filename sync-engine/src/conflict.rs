//! Conflict resolution between a remote entity and its local counterpart.
//!
//! One generic algorithm serves every kind. Kinds with unique names
//! (tags, saved searches, notebooks) resolve name collisions by renaming
//! the local loser to `"<name> - conflicting"`, `"... (2)"`, and so on.
//! Kinds without unique names (notes, resources) keep a locally modified
//! copy next to the incoming version.
//!
//! The future returned by [`ConflictResolver::resolve`] only holds a weak
//! reference to the resolver. Each storage probe is awaited without the
//! resolver being kept alive, and a continuation that finds the resolver
//! gone completes with [`SyncError::OperationCanceled`].

use futures_util::future::BoxFuture;
use std::sync::{Arc, Weak};
use sync_core::{conflicting_name, ConflictNames};
use sync_types::{Guid, SyncEntity};

use crate::error::{SyncError, SyncResult};
use crate::storage::EntityStore;

/// How to merge a remote entity with the local one.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution<K> {
    /// The remote version overwrites the local one.
    UseTheirs,
    /// The local version is kept; the remote one is dropped.
    UseMine,
    /// The two are unrelated; keep the local one and add the remote one.
    IgnoreMine,
    /// Keep the local entity under the carried copy (renamed), and apply
    /// the remote one.
    MoveMine(K),
}

impl<K> ConflictResolution<K> {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ConflictResolution::UseTheirs => "use_theirs",
            ConflictResolution::UseMine => "use_mine",
            ConflictResolution::IgnoreMine => "ignore_mine",
            ConflictResolution::MoveMine(_) => "move_mine",
        }
    }
}

/// Resolves conflicts for entities of kind `K`.
pub struct ConflictResolver<K: SyncEntity> {
    store: Arc<dyn EntityStore<K>>,
}

impl<K: SyncEntity> ConflictResolver<K> {
    /// Create a resolver probing the given store for name collisions.
    pub fn new(store: Arc<dyn EntityStore<K>>) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Decide how `theirs` (remote) and `mine` (local) are merged.
    ///
    /// `theirs` must carry a guid and a name; otherwise the future fails
    /// with [`SyncError::InvalidArgument`].
    pub fn resolve(
        self: &Arc<Self>,
        theirs: K,
        mine: K,
    ) -> BoxFuture<'static, SyncResult<ConflictResolution<K>>> {
        let this = Arc::downgrade(self);
        Box::pin(async move {
            let resolution = resolve_conflict(&this, &theirs, &mine).await?;
            tracing::debug!(
                entity = %theirs.describe(),
                resolution = resolution.name(),
                "Conflict resolved"
            );
            Ok(resolution)
        })
    }
}

/// Store handle for the next probe, or cancellation if the resolver is gone.
fn probe_store<K: SyncEntity>(this: &Weak<ConflictResolver<K>>) -> SyncResult<Arc<dyn EntityStore<K>>> {
    this.upgrade()
        .map(|resolver| Arc::clone(&resolver.store))
        .ok_or(SyncError::OperationCanceled)
}

fn ensure_alive<K: SyncEntity>(this: &Weak<ConflictResolver<K>>) -> SyncResult<()> {
    if this.strong_count() == 0 {
        return Err(SyncError::OperationCanceled);
    }
    Ok(())
}

async fn resolve_conflict<K: SyncEntity>(
    this: &Weak<ConflictResolver<K>>,
    theirs: &K,
    mine: &K,
) -> SyncResult<ConflictResolution<K>> {
    theirs.require_guid_and_name()?;
    ensure_alive(this)?;

    let their_name = theirs.name().unwrap_or_default();
    let same_guid = theirs.guid() == mine.guid();
    let same_name = mine.name() == Some(their_name);

    if !K::UNIQUE_NAMES {
        if !same_guid {
            return Ok(ConflictResolution::IgnoreMine);
        }
        if mine.is_locally_modified() {
            let mut copy = mine.clone();
            copy.set_name(conflicting_name(mine.name().unwrap_or(their_name), 1));
            return Ok(ConflictResolution::MoveMine(copy));
        }
        return Ok(ConflictResolution::UseTheirs);
    }

    let scope = theirs.linked_notebook_guid();
    match (same_guid, same_name) {
        (true, true) => Ok(ConflictResolution::UseTheirs),
        (false, true) => {
            if scope != mine.linked_notebook_guid() {
                return Ok(ConflictResolution::IgnoreMine);
            }
            let name = free_name(this, their_name, scope).await?;
            let mut copy = mine.clone();
            copy.set_name(name);
            copy.set_locally_modified(true);
            Ok(ConflictResolution::MoveMine(copy))
        }
        (true, false) => {
            let store = probe_store(this)?;
            let occupant = store.find_by_name(their_name, scope).await?;
            ensure_alive(this)?;
            match occupant {
                Some(mut other) if other.local_id() != mine.local_id() => {
                    let name = free_name(this, their_name, scope).await?;
                    tracing::debug!(
                        entity = %other.describe(),
                        new_name = %name,
                        "Renaming entity occupying the incoming name"
                    );
                    other.set_name(name);
                    other.set_locally_modified(true);
                    probe_store(this)?.put(other).await?;
                    ensure_alive(this)?;
                    Ok(ConflictResolution::UseTheirs)
                }
                _ => Ok(ConflictResolution::UseTheirs),
            }
        }
        (false, false) => Ok(ConflictResolution::IgnoreMine),
    }
}

/// First conflict name for `base` not taken in `scope`.
async fn free_name<K: SyncEntity>(
    this: &Weak<ConflictResolver<K>>,
    base: &str,
    scope: Option<&Guid>,
) -> SyncResult<String> {
    for candidate in ConflictNames::new(base) {
        let store = probe_store(this)?;
        let taken = store.find_by_name(&candidate, scope).await?;
        ensure_alive(this)?;
        if taken.is_none() {
            return Ok(candidate);
        }
    }
    Err(SyncError::InvalidArgument(format!(
        "no free conflict name for {:?}",
        base
    )))
}
