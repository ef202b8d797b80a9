//! Remote service contract.
//!
//! The engine never speaks the wire protocol itself. Chunks arrive
//! already decoded, and sending is one call per entity.
//!
//! # Design
//!
//! - `linked_notebooks()` lists the collections shared into the account
//! - `fetch_chunks()` returns every chunk of a scope above a USN
//! - `send()` uploads one entity and returns its server identity

mod mock;

pub use mock::MockRemote;

use async_trait::async_trait;
use sync_types::{Entity, Guid, LinkedNotebook, SyncChunk, Usn};

use crate::error::SyncResult;
use crate::ledger_store::SyncScope;

/// Server identity assigned to a sent entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Guid of the entity on the server.
    pub guid: Guid,
    /// USN the server assigned to this change.
    pub usn: Usn,
}

/// Access to the remote note service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Linked notebooks of the account.
    async fn linked_notebooks(&self) -> SyncResult<Vec<LinkedNotebook>>;

    /// Chunks of `scope` whose high USN is above `after`, oldest first.
    async fn fetch_chunks(&self, scope: &SyncScope, after: Usn) -> SyncResult<Vec<SyncChunk>>;

    /// Upload a new or modified entity into `scope`.
    async fn send(&self, scope: &SyncScope, entity: &Entity) -> SyncResult<SendReceipt>;
}
