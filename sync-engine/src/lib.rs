//! # sync-engine
//!
//! Async sync engine for local-first note clients.
//!
//! Applies batches of remote changes ([`SyncChunk`](sync_types::SyncChunk)s)
//! to a local entity store, resolves conflicts with local edits, persists
//! enough progress to resume an interrupted sync, and sends local changes
//! back.
//!
//! ## Features
//!
//! - **Per-kind processors**: tags in parent-before-child order, all other
//!   kinds processed concurrently per item
//! - **Conflict resolution**: renames colliding local entities, keeps
//!   locally edited copies of notes
//! - **Durable processing**: failed items are replayed on the next session
//! - **Cached lookups**: finders invalidated by storage notifications
//! - **Pluggable collaborators**: store, settings and remote are traits
//!   with in-memory implementations shipped for tests
//!
//! ## Example
//!
//! ```ignore
//! use notesync_engine::{SyncConfig, SyncEngine};
//!
//! let engine = SyncEngine::new(config, storage, remote, ledgers);
//! let summary = engine.sync().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod conflict;
pub mod durable;
pub mod engine;
pub mod error;
pub mod finder;
pub mod ledger_store;
pub mod processor;
pub mod remote;
pub mod settings;
pub mod storage;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::SyncConfig;
pub use conflict::{ConflictResolution, ConflictResolver};
pub use durable::DurableProcessor;
pub use engine::{ScopeProgressCallback, ScopeSummary, Stores, SyncEngine, SyncSummary};
pub use error::{SyncError, SyncResult};
pub use finder::{EntityFinder, NoteFinder, NotebookFinder, TagFinder};
pub use ledger_store::{LedgerCounts, LedgerStore, SyncScope};
pub use processor::{
    Canceler, EntityLinker, FullDataDownloader, MockDownloader, NoteLinker, ProgressCallback,
    ResourceLinker, SyncChunkProcessor, TagLinker,
};
pub use remote::{MockRemote, RemoteService, SendReceipt};
pub use settings::{FileSettingsBackend, MemorySettingsBackend, Settings, SettingsBackend};
pub use storage::{EntityStore, MemoryStorage, StorageEvent};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
