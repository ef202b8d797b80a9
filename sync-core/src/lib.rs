//! # sync-core
//!
//! Pure logic for notesync (no I/O, instant tests).
//!
//! This crate holds the algorithms of the sync engine that do not need
//! storage or a runtime: ordering hierarchical entities, collecting chunk
//! contents, naming conflict copies, accumulating processing status, the
//! resumable processing ledger, the send queue, and the stage machine the
//! orchestrator is driven by.
//!
//! All modules are **pure**: they take input and produce output without
//! side effects. The async layer in `sync-engine` performs the actual
//! storage round-trips and interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collect;
pub mod ledger;
pub mod naming;
pub mod queue;
pub mod stage;
pub mod status;
pub mod topo;

pub use collect::{collect, Collected};
pub use ledger::{KindLedger, ReplayBatch};
pub use naming::{conflicting_name, ConflictNames};
pub use queue::{QueueError, QueuedChange, SendQueue};
pub use stage::{StageAction, StageEvent, SyncEvent, SyncStage};
pub use status::{FailedExpunge, FailedItem, Progress, Status};
pub use topo::{CycleError, TopologicalSorter};
