//! Synced entity kinds.
//!
//! Every kind implements [`SyncEntity`], which is all the generic chunk
//! processors and conflict resolvers need to know about it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Guid, LocalId, SyncChunk, TypesError, Usn};

/// The kinds of entity carried by a sync chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// Hierarchical labels.
    Tag,
    /// Stored search queries.
    SavedSearch,
    /// Note containers.
    Notebook,
    /// Notes.
    Note,
    /// Attachments of notes.
    Resource,
}

impl EntityKind {
    /// All kinds, in the order a sync stage processes them.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Tag,
        EntityKind::SavedSearch,
        EntityKind::Notebook,
        EntityKind::Note,
        EntityKind::Resource,
    ];

    /// Namespace used for this kind in persisted ledgers.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tag => "tags",
            EntityKind::SavedSearch => "savedSearches",
            EntityKind::Notebook => "notebooks",
            EntityKind::Note => "notes",
            EntityKind::Resource => "resources",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract shared by every synced entity kind.
pub trait SyncEntity:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The kind this type represents.
    const KIND: EntityKind;

    /// Whether names are unique per linked-notebook scope.
    ///
    /// Kinds with unique names are matched by name when the guid lookup
    /// misses, and name collisions are resolved by renaming.
    const UNIQUE_NAMES: bool;

    /// Whether entities of this kind form a parent/child hierarchy.
    const HIERARCHICAL: bool = false;

    /// Local identifier.
    fn local_id(&self) -> LocalId;
    /// Replace the local identifier.
    fn set_local_id(&mut self, id: LocalId);

    /// Server guid, if the entity was ever synced.
    fn guid(&self) -> Option<&Guid>;
    /// Replace the server guid.
    fn set_guid(&mut self, guid: Option<Guid>);

    /// Update sequence number, if the entity was ever synced.
    fn usn(&self) -> Option<Usn>;
    /// Replace the update sequence number.
    fn set_usn(&mut self, usn: Option<Usn>);

    /// Display name (`name` or `title`).
    fn name(&self) -> Option<&str>;
    /// Replace the display name.
    fn set_name(&mut self, name: String);

    /// Guid of the linked notebook owning this entity, if foreign-owned.
    fn linked_notebook_guid(&self) -> Option<&Guid> {
        None
    }

    /// Guid of the parent entity, for hierarchical kinds.
    fn parent_guid(&self) -> Option<&Guid> {
        None
    }

    /// Drop the parent reference, for hierarchical kinds.
    fn clear_parent(&mut self) {}

    /// Copy device-local state (favorites, downloaded bodies) from the local
    /// copy this remote entity is about to overwrite.
    fn carry_local_fields(&mut self, _local: &Self) {}

    /// Whether the local copy carries unsent edits.
    fn is_locally_modified(&self) -> bool;
    /// Set or clear the unsent-edits flag.
    fn set_locally_modified(&mut self, modified: bool);

    /// Entities of this kind carried by a chunk.
    fn chunk_items(chunk: &SyncChunk) -> &[Self];
    /// Expunged guids of this kind carried by a chunk.
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid];
    /// Build a chunk carrying only entities and expunged guids of this kind.
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk;

    /// Wrap in the kind-erased [`Entity`] enum.
    fn into_entity(self) -> Entity;
    /// Unwrap from the kind-erased [`Entity`] enum.
    fn from_entity(entity: Entity) -> Option<Self>;

    /// Check that a remote entity has the fields conflict resolution needs.
    fn require_guid_and_name(&self) -> Result<(), TypesError> {
        if self.guid().map_or(true, Guid::is_empty) {
            return Err(TypesError::MissingField {
                entity: format!("{} {:?}", Self::KIND, self.local_id()),
                field: "guid",
            });
        }
        if self.name().is_none() {
            return Err(TypesError::MissingField {
                entity: format!("{} {:?}", Self::KIND, self.local_id()),
                field: "name",
            });
        }
        Ok(())
    }

    /// Human-readable label for logs.
    fn describe(&self) -> String {
        match self.guid() {
            Some(guid) => format!("{} {}", Self::KIND, guid),
            None => format!("{} {:?}", Self::KIND, self.local_id()),
        }
    }
}

/// A hierarchical label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server guid.
    pub guid: Option<Guid>,
    /// Update sequence number.
    pub usn: Option<Usn>,
    /// Tag name, unique per linked-notebook scope.
    pub name: Option<String>,
    /// Guid of the parent tag.
    pub parent_guid: Option<Guid>,
    /// Local id of the parent tag, resolved when stored.
    pub parent_local_id: Option<LocalId>,
    /// Guid of the linked notebook owning this tag.
    pub linked_notebook_guid: Option<Guid>,
    /// Unsent local edits.
    pub locally_modified: bool,
    /// Marked as favorite on this device.
    pub favorited: bool,
}

impl Tag {
    /// Create a new local tag.
    pub fn new(name: &str) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: None,
            usn: None,
            name: Some(name.to_string()),
            parent_guid: None,
            parent_local_id: None,
            linked_notebook_guid: None,
            locally_modified: false,
            favorited: false,
        }
    }

    /// Set the server guid and USN.
    pub fn with_guid(mut self, guid: &str, usn: u32) -> Self {
        self.guid = Some(Guid::new(guid));
        self.usn = Some(Usn::new(usn));
        self
    }

    /// Set the parent tag guid.
    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent_guid = Some(Guid::new(parent));
        self
    }

    /// Mark the tag as owned by a linked notebook.
    pub fn with_linked_notebook(mut self, guid: &str) -> Self {
        self.linked_notebook_guid = Some(Guid::new(guid));
        self
    }
}

impl SyncEntity for Tag {
    const KIND: EntityKind = EntityKind::Tag;
    const UNIQUE_NAMES: bool = true;
    const HIERARCHICAL: bool = true;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }
    fn set_guid(&mut self, guid: Option<Guid>) {
        self.guid = guid;
    }
    fn usn(&self) -> Option<Usn> {
        self.usn
    }
    fn set_usn(&mut self, usn: Option<Usn>) {
        self.usn = usn;
    }
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
    fn linked_notebook_guid(&self) -> Option<&Guid> {
        self.linked_notebook_guid.as_ref()
    }
    fn parent_guid(&self) -> Option<&Guid> {
        self.parent_guid.as_ref()
    }
    fn clear_parent(&mut self) {
        self.parent_guid = None;
        self.parent_local_id = None;
    }
    fn carry_local_fields(&mut self, local: &Self) {
        self.favorited = local.favorited;
    }
    fn is_locally_modified(&self) -> bool {
        self.locally_modified
    }
    fn set_locally_modified(&mut self, modified: bool) {
        self.locally_modified = modified;
    }
    fn chunk_items(chunk: &SyncChunk) -> &[Self] {
        &chunk.tags
    }
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_tags
    }
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk {
        SyncChunk {
            tags: items,
            expunged_tags: expunged,
            ..SyncChunk::default()
        }
    }
    fn into_entity(self) -> Entity {
        Entity::Tag(self)
    }
    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

/// A stored search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server guid.
    pub guid: Option<Guid>,
    /// Update sequence number.
    pub usn: Option<Usn>,
    /// Search name, unique per account.
    pub name: Option<String>,
    /// Query text.
    pub query: String,
    /// Unsent local edits.
    pub locally_modified: bool,
    /// Marked as favorite on this device.
    pub favorited: bool,
}

impl SavedSearch {
    /// Create a new local saved search.
    pub fn new(name: &str, query: &str) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: None,
            usn: None,
            name: Some(name.to_string()),
            query: query.to_string(),
            locally_modified: false,
            favorited: false,
        }
    }

    /// Set the server guid and USN.
    pub fn with_guid(mut self, guid: &str, usn: u32) -> Self {
        self.guid = Some(Guid::new(guid));
        self.usn = Some(Usn::new(usn));
        self
    }
}

impl SyncEntity for SavedSearch {
    const KIND: EntityKind = EntityKind::SavedSearch;
    const UNIQUE_NAMES: bool = true;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }
    fn set_guid(&mut self, guid: Option<Guid>) {
        self.guid = guid;
    }
    fn usn(&self) -> Option<Usn> {
        self.usn
    }
    fn set_usn(&mut self, usn: Option<Usn>) {
        self.usn = usn;
    }
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
    fn carry_local_fields(&mut self, local: &Self) {
        self.favorited = local.favorited;
    }
    fn is_locally_modified(&self) -> bool {
        self.locally_modified
    }
    fn set_locally_modified(&mut self, modified: bool) {
        self.locally_modified = modified;
    }
    fn chunk_items(chunk: &SyncChunk) -> &[Self] {
        &chunk.saved_searches
    }
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_saved_searches
    }
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk {
        SyncChunk {
            saved_searches: items,
            expunged_saved_searches: expunged,
            ..SyncChunk::default()
        }
    }
    fn into_entity(self) -> Entity {
        Entity::SavedSearch(self)
    }
    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::SavedSearch(search) => Some(search),
            _ => None,
        }
    }
}

/// A container of notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server guid.
    pub guid: Option<Guid>,
    /// Update sequence number.
    pub usn: Option<Usn>,
    /// Notebook name, unique per linked-notebook scope.
    pub name: Option<String>,
    /// Guid of the linked notebook this notebook is shared through.
    pub linked_notebook_guid: Option<Guid>,
    /// Whether new notes land here by default.
    pub default_notebook: bool,
    /// Unsent local edits.
    pub locally_modified: bool,
    /// Marked as favorite on this device.
    pub favorited: bool,
}

impl Notebook {
    /// Create a new local notebook.
    pub fn new(name: &str) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: None,
            usn: None,
            name: Some(name.to_string()),
            linked_notebook_guid: None,
            default_notebook: false,
            locally_modified: false,
            favorited: false,
        }
    }

    /// Set the server guid and USN.
    pub fn with_guid(mut self, guid: &str, usn: u32) -> Self {
        self.guid = Some(Guid::new(guid));
        self.usn = Some(Usn::new(usn));
        self
    }

    /// Mark the notebook as shared through a linked notebook.
    pub fn with_linked_notebook(mut self, guid: &str) -> Self {
        self.linked_notebook_guid = Some(Guid::new(guid));
        self
    }
}

impl SyncEntity for Notebook {
    const KIND: EntityKind = EntityKind::Notebook;
    const UNIQUE_NAMES: bool = true;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }
    fn set_guid(&mut self, guid: Option<Guid>) {
        self.guid = guid;
    }
    fn usn(&self) -> Option<Usn> {
        self.usn
    }
    fn set_usn(&mut self, usn: Option<Usn>) {
        self.usn = usn;
    }
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
    fn linked_notebook_guid(&self) -> Option<&Guid> {
        self.linked_notebook_guid.as_ref()
    }
    fn carry_local_fields(&mut self, local: &Self) {
        self.favorited = local.favorited;
    }
    fn is_locally_modified(&self) -> bool {
        self.locally_modified
    }
    fn set_locally_modified(&mut self, modified: bool) {
        self.locally_modified = modified;
    }
    fn chunk_items(chunk: &SyncChunk) -> &[Self] {
        &chunk.notebooks
    }
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_notebooks
    }
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk {
        SyncChunk {
            notebooks: items,
            expunged_notebooks: expunged,
            ..SyncChunk::default()
        }
    }
    fn into_entity(self) -> Entity {
        Entity::Notebook(self)
    }
    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Notebook(notebook) => Some(notebook),
            _ => None,
        }
    }
}

/// A note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server guid.
    pub guid: Option<Guid>,
    /// Update sequence number.
    pub usn: Option<Usn>,
    /// Note title; not unique.
    pub title: Option<String>,
    /// Note body; absent until full data was downloaded.
    pub content: Option<String>,
    /// Guid of the owning notebook.
    pub notebook_guid: Option<Guid>,
    /// Local id of the owning notebook, resolved when stored.
    pub notebook_local_id: Option<LocalId>,
    /// Guids of the tags applied to the note.
    pub tag_guids: Vec<Guid>,
    /// Unsent local edits.
    pub locally_modified: bool,
    /// Marked as favorite on this device.
    pub favorited: bool,
}

impl Note {
    /// Create a new local note in the given notebook.
    pub fn new(title: &str, notebook: &Notebook) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: None,
            usn: None,
            title: Some(title.to_string()),
            content: None,
            notebook_guid: notebook.guid.clone(),
            notebook_local_id: Some(notebook.local_id),
            tag_guids: Vec::new(),
            locally_modified: false,
            favorited: false,
        }
    }

    /// Create note metadata as it arrives in a sync chunk.
    pub fn remote(guid: &str, usn: u32, title: &str, notebook_guid: &str) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: Some(Guid::new(guid)),
            usn: Some(Usn::new(usn)),
            title: Some(title.to_string()),
            content: None,
            notebook_guid: Some(Guid::new(notebook_guid)),
            notebook_local_id: None,
            tag_guids: Vec::new(),
            locally_modified: false,
            favorited: false,
        }
    }
}

impl SyncEntity for Note {
    const KIND: EntityKind = EntityKind::Note;
    const UNIQUE_NAMES: bool = false;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }
    fn set_guid(&mut self, guid: Option<Guid>) {
        self.guid = guid;
    }
    fn usn(&self) -> Option<Usn> {
        self.usn
    }
    fn set_usn(&mut self, usn: Option<Usn>) {
        self.usn = usn;
    }
    fn name(&self) -> Option<&str> {
        self.title.as_deref()
    }
    fn set_name(&mut self, name: String) {
        self.title = Some(name);
    }
    fn carry_local_fields(&mut self, local: &Self) {
        self.favorited = local.favorited;
        if self.content.is_none() {
            self.content = local.content.clone();
        }
    }
    fn is_locally_modified(&self) -> bool {
        self.locally_modified
    }
    fn set_locally_modified(&mut self, modified: bool) {
        self.locally_modified = modified;
    }
    fn chunk_items(chunk: &SyncChunk) -> &[Self] {
        &chunk.notes
    }
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_notes
    }
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk {
        SyncChunk {
            notes: items,
            expunged_notes: expunged,
            ..SyncChunk::default()
        }
    }
    fn into_entity(self) -> Entity {
        Entity::Note(self)
    }
    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Note(note) => Some(note),
            _ => None,
        }
    }
}

/// A binary attachment of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Local identifier.
    pub local_id: LocalId,
    /// Server guid.
    pub guid: Option<Guid>,
    /// Update sequence number.
    pub usn: Option<Usn>,
    /// Attachment file name; not unique.
    pub file_name: Option<String>,
    /// MIME type.
    pub mime: String,
    /// Guid of the owning note.
    pub note_guid: Option<Guid>,
    /// Local id of the owning note, resolved when stored.
    pub note_local_id: Option<LocalId>,
    /// Attachment body; absent until full data was downloaded.
    pub data: Option<Vec<u8>>,
    /// Unsent local edits.
    pub locally_modified: bool,
}

impl Resource {
    /// Create resource metadata as it arrives in a sync chunk.
    pub fn remote(guid: &str, usn: u32, file_name: &str, note_guid: &str) -> Self {
        Self {
            local_id: LocalId::new(),
            guid: Some(Guid::new(guid)),
            usn: Some(Usn::new(usn)),
            file_name: Some(file_name.to_string()),
            mime: "application/octet-stream".to_string(),
            note_guid: Some(Guid::new(note_guid)),
            note_local_id: None,
            data: None,
            locally_modified: false,
        }
    }
}

impl SyncEntity for Resource {
    const KIND: EntityKind = EntityKind::Resource;
    const UNIQUE_NAMES: bool = false;

    fn local_id(&self) -> LocalId {
        self.local_id
    }
    fn set_local_id(&mut self, id: LocalId) {
        self.local_id = id;
    }
    fn guid(&self) -> Option<&Guid> {
        self.guid.as_ref()
    }
    fn set_guid(&mut self, guid: Option<Guid>) {
        self.guid = guid;
    }
    fn usn(&self) -> Option<Usn> {
        self.usn
    }
    fn set_usn(&mut self, usn: Option<Usn>) {
        self.usn = usn;
    }
    fn name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }
    fn set_name(&mut self, name: String) {
        self.file_name = Some(name);
    }
    fn carry_local_fields(&mut self, local: &Self) {
        if self.data.is_none() {
            self.data = local.data.clone();
        }
    }
    fn is_locally_modified(&self) -> bool {
        self.locally_modified
    }
    fn set_locally_modified(&mut self, modified: bool) {
        self.locally_modified = modified;
    }
    fn chunk_items(chunk: &SyncChunk) -> &[Self] {
        &chunk.resources
    }
    fn chunk_expunged(chunk: &SyncChunk) -> &[Guid] {
        &chunk.expunged_resources
    }
    fn make_chunk(items: Vec<Self>, expunged: Vec<Guid>) -> SyncChunk {
        SyncChunk {
            resources: items,
            expunged_resources: expunged,
            ..SyncChunk::default()
        }
    }
    fn into_entity(self) -> Entity {
        Entity::Resource(self)
    }
    fn from_entity(entity: Entity) -> Option<Self> {
        match entity {
            Entity::Resource(resource) => Some(resource),
            _ => None,
        }
    }
}

/// One entity of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Entity {
    /// A tag.
    Tag(Tag),
    /// A saved search.
    SavedSearch(SavedSearch),
    /// A notebook.
    Notebook(Notebook),
    /// A note.
    Note(Note),
    /// A resource.
    Resource(Resource),
}

impl Entity {
    /// Kind of the wrapped entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Tag(_) => EntityKind::Tag,
            Entity::SavedSearch(_) => EntityKind::SavedSearch,
            Entity::Notebook(_) => EntityKind::Notebook,
            Entity::Note(_) => EntityKind::Note,
            Entity::Resource(_) => EntityKind::Resource,
        }
    }

    /// Local id of the wrapped entity.
    pub fn local_id(&self) -> LocalId {
        match self {
            Entity::Tag(e) => e.local_id,
            Entity::SavedSearch(e) => e.local_id,
            Entity::Notebook(e) => e.local_id,
            Entity::Note(e) => e.local_id,
            Entity::Resource(e) => e.local_id,
        }
    }

    /// Guid of the wrapped entity.
    pub fn guid(&self) -> Option<&Guid> {
        match self {
            Entity::Tag(e) => e.guid.as_ref(),
            Entity::SavedSearch(e) => e.guid.as_ref(),
            Entity::Notebook(e) => e.guid.as_ref(),
            Entity::Note(e) => e.guid.as_ref(),
            Entity::Resource(e) => e.guid.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_namespaces_are_distinct() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EntityKind::ALL.len());
    }

    #[test]
    fn require_guid_and_name_rejects_missing_guid() {
        let tag = Tag::new("Work");
        assert!(matches!(
            tag.require_guid_and_name(),
            Err(TypesError::MissingField { field: "guid", .. })
        ));
    }

    #[test]
    fn require_guid_and_name_rejects_missing_name() {
        let mut tag = Tag::new("Work").with_guid("g1", 1);
        tag.name = None;
        assert!(matches!(
            tag.require_guid_and_name(),
            Err(TypesError::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn note_title_is_its_name() {
        let mut note = Note::remote("n1", 3, "Groceries", "nb1");
        assert_eq!(note.name(), Some("Groceries"));
        note.set_name("Shopping".into());
        assert_eq!(note.title.as_deref(), Some("Shopping"));
    }

    #[test]
    fn carry_local_fields_keeps_body_and_favorite() {
        let mut local = Note::remote("n1", 3, "Groceries", "nb1");
        local.content = Some("milk".into());
        local.favorited = true;

        let mut theirs = Note::remote("n1", 4, "Groceries", "nb1");
        theirs.carry_local_fields(&local);
        assert_eq!(theirs.content.as_deref(), Some("milk"));
        assert!(theirs.favorited);
    }

    #[test]
    fn clear_parent_detaches_tag() {
        let mut tag = Tag::new("Child").with_parent("p1");
        tag.parent_local_id = Some(LocalId::new());
        tag.clear_parent();
        assert!(tag.parent_guid.is_none());
        assert!(tag.parent_local_id.is_none());
    }

    #[test]
    fn entity_roundtrip_through_enum() {
        let notebook = Notebook::new("Inbox").with_guid("nb1", 2);
        let entity = notebook.clone().into_entity();
        assert_eq!(entity.kind(), EntityKind::Notebook);
        assert_eq!(entity.guid(), Some(&Guid::new("nb1")));
        assert_eq!(Notebook::from_entity(entity), Some(notebook));
    }

    #[test]
    fn from_entity_rejects_other_kind() {
        let entity = Tag::new("x").into_entity();
        assert_eq!(Note::from_entity(entity), None);
    }

    #[test]
    fn make_chunk_fills_only_own_kind() {
        let chunk = SavedSearch::make_chunk(
            vec![SavedSearch::new("s", "tag:x")],
            vec![Guid::new("gone")],
        );
        assert_eq!(chunk.saved_searches.len(), 1);
        assert_eq!(chunk.expunged_saved_searches, vec![Guid::new("gone")]);
        assert!(chunk.tags.is_empty());
        assert!(chunk.notes.is_empty());
    }
}
