//! Outgoing change queue for the send stage.
//!
//! Local changes flow through the queue in this order:
//! 1. `enqueue()` - add to the queue
//! 2. `dequeue()` - remove from the queue, move to pending
//! 3. `ack()` - remove from pending (the remote accepted it)
//!
//! If sending fails, `nack()` moves the change back to the front of the
//! queue. The capacity bounds queued plus pending changes.

use std::collections::{HashMap, VecDeque};
use sync_types::{Entity, EntityKind, Guid, LocalId};
use thiserror::Error;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue is at capacity.
    #[error("send queue full (capacity: {capacity})")]
    Full {
        /// Queue capacity.
        capacity: usize,
    },
}

/// A local change waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChange {
    /// The dirty entity.
    pub entity: Entity,
    /// Linked notebook the change belongs to; `None` for the own account.
    pub target: Option<Guid>,
}

impl QueuedChange {
    /// Create a queued change.
    pub fn new(entity: Entity, target: Option<Guid>) -> Self {
        Self { entity, target }
    }

    /// Local id of the changed entity.
    pub fn local_id(&self) -> LocalId {
        self.entity.local_id()
    }

    /// Kind of the changed entity.
    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }
}

/// Bounded FIFO of local changes with pending tracking.
#[derive(Debug)]
pub struct SendQueue {
    capacity: usize,
    queue: VecDeque<QueuedChange>,
    pending: HashMap<LocalId, QueuedChange>,
}

impl SendQueue {
    /// Create a queue holding at most `capacity` queued plus pending changes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            pending: HashMap::new(),
        }
    }

    /// Add a change to the back of the queue.
    pub fn enqueue(&mut self, change: QueuedChange) -> Result<(), QueueError> {
        if self.total_count() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(change);
        Ok(())
    }

    /// Take the next change; it stays pending until acknowledged.
    pub fn dequeue(&mut self) -> Option<QueuedChange> {
        let change = self.queue.pop_front()?;
        self.pending.insert(change.local_id(), change.clone());
        Some(change)
    }

    /// The remote accepted the change.
    pub fn ack(&mut self, local_id: &LocalId) {
        self.pending.remove(local_id);
    }

    /// Sending failed; retry the change next.
    pub fn nack(&mut self, local_id: &LocalId) {
        if let Some(change) = self.pending.remove(local_id) {
            self.queue.push_front(change);
        }
    }

    /// Drop a pending change without retrying it.
    pub fn abandon(&mut self, local_id: &LocalId) -> Option<QueuedChange> {
        self.pending.remove(local_id)
    }

    /// Whether a change is sent but not yet acknowledged.
    pub fn is_pending(&self, local_id: &LocalId) -> bool {
        self.pending.contains_key(local_id)
    }

    /// Number of queued changes (not including pending).
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending changes.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queued plus pending.
    pub fn total_count(&self) -> usize {
        self.queue.len() + self.pending.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }
}
