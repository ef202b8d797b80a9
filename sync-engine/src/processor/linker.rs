//! Resolving guid references of remote entities to local ids.

use async_trait::async_trait;
use std::sync::Arc;
use sync_types::{Note, Resource, SyncEntity, Tag};

use super::EntityLinker;
use crate::error::SyncResult;
use crate::finder::{NoteFinder, NotebookFinder, TagFinder};

/// Points a tag at its stored parent, or detaches it if the parent is unknown.
pub struct TagLinker {
    tags: Arc<TagFinder>,
}

impl TagLinker {
    /// Create a linker resolving parents through `tags`.
    pub fn new(tags: Arc<TagFinder>) -> Self {
        Self { tags }
    }
}

#[async_trait]
impl EntityLinker<Tag> for TagLinker {
    async fn link(&self, mut tag: Tag) -> SyncResult<Tag> {
        let Some(parent_guid) = tag.parent_guid.clone() else {
            tag.parent_local_id = None;
            return Ok(tag);
        };
        match self.tags.find_by_guid(&parent_guid).await? {
            Some(parent) => tag.parent_local_id = Some(parent.local_id),
            None => {
                tracing::warn!(
                    tag = %tag.describe(),
                    parent = %parent_guid,
                    "Parent tag not found, detaching"
                );
                tag.clear_parent();
            }
        }
        Ok(tag)
    }
}

/// Resolves the local id of a note's notebook.
pub struct NoteLinker {
    notebooks: Arc<NotebookFinder>,
}

impl NoteLinker {
    /// Create a linker resolving notebooks through `notebooks`.
    pub fn new(notebooks: Arc<NotebookFinder>) -> Self {
        Self { notebooks }
    }
}

#[async_trait]
impl EntityLinker<Note> for NoteLinker {
    async fn link(&self, mut note: Note) -> SyncResult<Note> {
        if let Some(guid) = note.notebook_guid.clone() {
            note.notebook_local_id = self
                .notebooks
                .find_by_guid(&guid)
                .await?
                .map(|notebook| notebook.local_id);
        }
        Ok(note)
    }
}

/// Resolves the local id of a resource's note.
pub struct ResourceLinker {
    notes: Arc<NoteFinder>,
}

impl ResourceLinker {
    /// Create a linker resolving notes through `notes`.
    pub fn new(notes: Arc<NoteFinder>) -> Self {
        Self { notes }
    }
}

#[async_trait]
impl EntityLinker<Resource> for ResourceLinker {
    async fn link(&self, mut resource: Resource) -> SyncResult<Resource> {
        if let Some(guid) = resource.note_guid.clone() {
            resource.note_local_id = self
                .notes
                .find_by_guid(&guid)
                .await?
                .map(|note| note.local_id);
        }
        Ok(resource)
    }
}
