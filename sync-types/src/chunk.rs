//! Decoded batches of remote changes.

use serde::{Deserialize, Serialize};

use crate::{Guid, Note, Notebook, Resource, SavedSearch, Tag, Usn};

/// A notebook owned by another account and shared into this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedNotebook {
    /// Guid of the link itself.
    pub guid: Guid,
    /// Update sequence number of the link.
    pub usn: Option<Usn>,
    /// Name the share is presented under.
    pub share_name: String,
    /// Owner of the shared notebook.
    pub username: String,
}

impl LinkedNotebook {
    /// Create a linked notebook record.
    pub fn new(guid: &str, share_name: &str, username: &str) -> Self {
        Self {
            guid: Guid::new(guid),
            usn: None,
            share_name: share_name.to_string(),
            username: username.to_string(),
        }
    }
}

/// An immutable batch of remote changes.
///
/// Lists created/updated entities and expunged guids per kind, as received
/// from the remote service (already decoded).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncChunk {
    /// Highest USN covered by this chunk.
    pub chunk_high_usn: Option<Usn>,
    /// Created or updated tags.
    pub tags: Vec<Tag>,
    /// Created or updated saved searches.
    pub saved_searches: Vec<SavedSearch>,
    /// Created or updated notebooks.
    pub notebooks: Vec<Notebook>,
    /// Created or updated notes (metadata only).
    pub notes: Vec<Note>,
    /// Created or updated resources (metadata only).
    pub resources: Vec<Resource>,
    /// Linked notebooks visible to the own account.
    pub linked_notebooks: Vec<LinkedNotebook>,
    /// Expunged tag guids.
    pub expunged_tags: Vec<Guid>,
    /// Expunged saved search guids.
    pub expunged_saved_searches: Vec<Guid>,
    /// Expunged notebook guids.
    pub expunged_notebooks: Vec<Guid>,
    /// Expunged note guids.
    pub expunged_notes: Vec<Guid>,
    /// Expunged resource guids.
    pub expunged_resources: Vec<Guid>,
    /// Expunged linked notebook guids.
    pub expunged_linked_notebooks: Vec<Guid>,
}

impl SyncChunk {
    /// Create an empty chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk's high USN.
    pub fn with_high_usn(mut self, usn: u32) -> Self {
        self.chunk_high_usn = Some(Usn::new(usn));
        self
    }

    /// Whether the chunk carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.saved_searches.is_empty()
            && self.notebooks.is_empty()
            && self.notes.is_empty()
            && self.resources.is_empty()
            && self.linked_notebooks.is_empty()
            && self.expunged_tags.is_empty()
            && self.expunged_saved_searches.is_empty()
            && self.expunged_notebooks.is_empty()
            && self.expunged_notes.is_empty()
            && self.expunged_resources.is_empty()
            && self.expunged_linked_notebooks.is_empty()
    }

    /// Highest USN mentioned by the chunk, explicit or carried by an entity.
    pub fn high_usn(&self) -> Option<Usn> {
        let items = self
            .tags
            .iter()
            .filter_map(|e| e.usn)
            .chain(self.saved_searches.iter().filter_map(|e| e.usn))
            .chain(self.notebooks.iter().filter_map(|e| e.usn))
            .chain(self.notes.iter().filter_map(|e| e.usn))
            .chain(self.resources.iter().filter_map(|e| e.usn));
        items.chain(self.chunk_high_usn).max()
    }
}
