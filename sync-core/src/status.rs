//! Outcome accounting for one processor invocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sync_types::{Guid, ItemError, SyncEntity, Usn};

/// Counters reported to progress callbacks after every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Entities of the kind in the batch.
    pub total: usize,
    /// Guids of the kind to expunge in the batch.
    pub total_to_expunge: usize,
    /// Entities inserted so far.
    pub added: usize,
    /// Entities overwritten so far.
    pub updated: usize,
    /// Entities expunged so far.
    pub expunged: usize,
}

impl Progress {
    /// Component-wise sum.
    pub fn merged(self, other: Progress) -> Progress {
        Progress {
            total: self.total + other.total,
            total_to_expunge: self.total_to_expunge + other.total_to_expunge,
            added: self.added + other.added,
            updated: self.updated + other.updated,
            expunged: self.expunged + other.expunged,
        }
    }
}

/// An entity that could not be processed, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem<K> {
    /// Full entity payload, as offered by the batch.
    pub entity: K,
    /// Why it failed.
    pub error: ItemError,
}

impl<K: SyncEntity> FailedItem<K> {
    /// Create a failure record.
    pub fn new(entity: K, error: ItemError) -> Self {
        Self { entity, error }
    }

    /// Guid of the failed entity.
    pub fn guid(&self) -> Option<&Guid> {
        self.entity.guid()
    }
}

/// A guid that could not be expunged locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExpunge {
    /// The guid.
    pub guid: Guid,
    /// Why it failed.
    pub error: ItemError,
}

/// Aggregate outcome of processing a batch of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status<K> {
    /// Counters.
    pub progress: Progress,
    /// Successfully processed guids with the USN they were processed at.
    pub processed: BTreeMap<Guid, Usn>,
    /// Successfully expunged guids.
    pub expunged: Vec<Guid>,
    /// Guids that failed to expunge.
    pub failed_to_expunge: Vec<FailedExpunge>,
    /// Entities whose full data could not be downloaded.
    pub failed_to_download: Vec<FailedItem<K>>,
    /// Entities that could not be stored.
    pub failed_to_process: Vec<FailedItem<K>>,
    /// Entities not attempted because the batch was cancelled.
    pub cancelled: Vec<FailedItem<K>>,
}

impl<K> Default for Status<K> {
    fn default() -> Self {
        Self {
            progress: Progress::default(),
            processed: BTreeMap::new(),
            expunged: Vec::new(),
            failed_to_expunge: Vec::new(),
            failed_to_download: Vec::new(),
            failed_to_process: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

impl<K: SyncEntity> Status<K> {
    /// Empty status for a batch of the given size.
    pub fn new(total: usize, total_to_expunge: usize) -> Self {
        Self {
            progress: Progress {
                total,
                total_to_expunge,
                ..Progress::default()
            },
            ..Self::default()
        }
    }

    /// Record an inserted entity.
    pub fn record_added(&mut self, entity: &K) {
        self.progress.added += 1;
        self.mark_processed(entity);
    }

    /// Record an overwritten entity.
    pub fn record_updated(&mut self, entity: &K) {
        self.progress.updated += 1;
        self.mark_processed(entity);
    }

    /// Record a remote entity the local copy was kept over.
    pub fn record_kept(&mut self, entity: &K) {
        self.mark_processed(entity);
    }

    /// Record an expunged guid.
    pub fn record_expunged(&mut self, guid: Guid) {
        self.progress.expunged += 1;
        self.expunged.push(guid);
    }

    /// Record a guid that failed to expunge.
    pub fn record_failed_to_expunge(&mut self, guid: Guid, error: ItemError) {
        self.failed_to_expunge.push(FailedExpunge { guid, error });
    }

    /// Record an entity whose full data could not be downloaded.
    pub fn record_failed_to_download(&mut self, entity: K, error: ItemError) {
        self.failed_to_download.push(FailedItem::new(entity, error));
    }

    /// Record an entity that could not be stored.
    pub fn record_failed_to_process(&mut self, entity: K, error: ItemError) {
        self.failed_to_process.push(FailedItem::new(entity, error));
    }

    /// Record an entity skipped because the batch was cancelled.
    pub fn record_cancelled(&mut self, entity: K, error: ItemError) {
        self.cancelled.push(FailedItem::new(entity, error));
    }

    /// Number of failed or cancelled items and expunges.
    pub fn failure_count(&self) -> usize {
        self.failed_to_expunge.len()
            + self.failed_to_download.len()
            + self.failed_to_process.len()
            + self.cancelled.len()
    }

    /// Fold another status into this one.
    pub fn merge(&mut self, other: Status<K>) {
        self.progress = self.progress.merged(other.progress);
        for (guid, usn) in other.processed {
            let entry = self.processed.entry(guid).or_insert(usn);
            if *entry < usn {
                *entry = usn;
            }
        }
        self.expunged.extend(other.expunged);
        self.failed_to_expunge.extend(other.failed_to_expunge);
        self.failed_to_download.extend(other.failed_to_download);
        self.failed_to_process.extend(other.failed_to_process);
        self.cancelled.extend(other.cancelled);
    }

    fn mark_processed(&mut self, entity: &K) {
        if let Some(guid) = entity.guid() {
            self.processed
                .insert(guid.clone(), entity.usn().unwrap_or_else(Usn::zero));
        }
    }
}
