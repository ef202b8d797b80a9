//! # sync-types
//!
//! Data model shared by all notesync crates.
//!
//! - [`LocalId`], [`Guid`], [`Usn`] - identity and ordering types
//! - [`Tag`], [`SavedSearch`], [`Notebook`], [`Note`], [`Resource`] - synced entities
//! - [`SyncEntity`] - the per-kind contract the generic processors rely on
//! - [`SyncChunk`] - a decoded batch of remote changes
//! - [`ItemError`] - serializable per-item failure record

#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk;
mod entity;
mod error;
mod ids;

pub use chunk::{LinkedNotebook, SyncChunk};
pub use entity::{
    Entity, EntityKind, Note, Notebook, Resource, SavedSearch, SyncEntity, Tag,
};
pub use error::{ErrorKind, ItemError, TypesError};
pub use ids::{Guid, LocalId, Usn};
