//! The per-kind processing ledger behind resumable sync.
//!
//! A [`KindLedger`] remembers, across sync sessions, which guids were
//! processed at which USN, which were expunged, and which entities failed
//! (to download, to process, or were cancelled). At the start of a session
//! the failures are turned into a [`ReplayBatch`]; after every batch the
//! resulting [`Status`] is merged back in.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use sync_types::{Guid, SyncChunk, SyncEntity, Usn};

use crate::status::{FailedExpunge, FailedItem, Status};

/// Persisted processing state of one entity kind in one sync scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindLedger<K> {
    /// Guids processed successfully, with the USN they were processed at.
    pub processed: BTreeMap<Guid, Usn>,
    /// Guids expunged locally.
    pub expunged: BTreeSet<Guid>,
    /// Guids whose local expunge failed.
    pub failed_to_expunge: Vec<FailedExpunge>,
    /// Entities whose full data could not be downloaded.
    pub failed_to_download: Vec<FailedItem<K>>,
    /// Entities that could not be stored.
    pub failed_to_process: Vec<FailedItem<K>>,
    /// Entities cancelled mid-flight.
    pub cancelled: Vec<FailedItem<K>>,
}

impl<K> Default for KindLedger<K> {
    fn default() -> Self {
        Self {
            processed: BTreeMap::new(),
            expunged: BTreeSet::new(),
            failed_to_expunge: Vec::new(),
            failed_to_download: Vec::new(),
            failed_to_process: Vec::new(),
            cancelled: Vec::new(),
        }
    }
}

/// Work carried over from a previous session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayBatch {
    /// Synthetic chunk holding the entities and expunges to retry.
    pub chunk: SyncChunk,
    /// Number of entities to retry.
    pub items: usize,
    /// Number of expunges to retry.
    pub expunges: usize,
}

impl<K: SyncEntity> KindLedger<K> {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the ledger holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.expunged.is_empty() && self.pending_failures() == 0
    }

    /// Number of entries waiting to be replayed.
    pub fn pending_failures(&self) -> usize {
        self.failed_to_expunge.len()
            + self.failed_to_download.len()
            + self.failed_to_process.len()
            + self.cancelled.len()
    }

    /// Whether `guid` was already processed at `usn` or newer.
    pub fn is_processed(&self, guid: &Guid, usn: Option<Usn>) -> bool {
        match (self.processed.get(guid), usn) {
            (Some(done), Some(offered)) => *done >= offered,
            _ => false,
        }
    }

    /// Drop everything already handled from `chunks`.
    ///
    /// Returns one chunk per input chunk carrying only kind `K`, without
    /// entities processed at an equal or newer USN and without guids
    /// already expunged, plus the number of entries skipped.
    pub fn without_processed(&self, chunks: &[SyncChunk]) -> (Vec<SyncChunk>, usize) {
        let mut skipped = 0;
        let filtered = chunks
            .iter()
            .map(|chunk| {
                let items: Vec<K> = K::chunk_items(chunk)
                    .iter()
                    .filter(|item| match item.guid() {
                        Some(guid) if self.is_processed(guid, item.usn()) => {
                            skipped += 1;
                            false
                        }
                        _ => true,
                    })
                    .cloned()
                    .collect();
                let expunged: Vec<Guid> = K::chunk_expunged(chunk)
                    .iter()
                    .filter(|guid| {
                        if self.expunged.contains(*guid) {
                            skipped += 1;
                            false
                        } else {
                            true
                        }
                    })
                    .cloned()
                    .collect();
                let mut out = K::make_chunk(items, expunged);
                out.chunk_high_usn = chunk.chunk_high_usn;
                out
            })
            .collect();
        (filtered, skipped)
    }

    /// Take the failures of previous sessions out as a replay batch.
    ///
    /// Entries already processed at an equal or newer USN are discarded.
    /// Entries the `current` chunks offer again at an equal or newer USN,
    /// or expunge, are discarded too: the current batch handles them.
    /// Returns `None` when there is nothing to replay.
    pub fn take_replay(&mut self, current: &[SyncChunk]) -> Option<ReplayBatch> {
        let mut offered: HashMap<&Guid, Option<Usn>> = HashMap::new();
        let mut expunged_now: HashSet<&Guid> = HashSet::new();
        for chunk in current {
            for item in K::chunk_items(chunk) {
                if let Some(guid) = item.guid() {
                    let entry = offered.entry(guid).or_insert(item.usn());
                    if *entry < item.usn() {
                        *entry = item.usn();
                    }
                }
            }
            expunged_now.extend(K::chunk_expunged(chunk));
        }

        let failed: Vec<FailedItem<K>> = std::mem::take(&mut self.failed_to_download)
            .into_iter()
            .chain(std::mem::take(&mut self.failed_to_process))
            .chain(std::mem::take(&mut self.cancelled))
            .collect();

        let mut items: Vec<K> = Vec::new();
        let mut by_guid: HashMap<Guid, usize> = HashMap::new();
        for FailedItem { entity, .. } in failed {
            let Some(guid) = entity.guid().cloned() else {
                items.push(entity);
                continue;
            };
            if self.is_processed(&guid, entity.usn()) || expunged_now.contains(&guid) {
                continue;
            }
            if offered
                .get(&guid)
                .is_some_and(|usn| *usn >= entity.usn())
            {
                continue;
            }
            match by_guid.get(&guid) {
                Some(&index) if items[index].usn() <= entity.usn() => items[index] = entity,
                Some(_) => {}
                None => {
                    by_guid.insert(guid, items.len());
                    items.push(entity);
                }
            }
        }

        let mut expunges: Vec<Guid> = Vec::new();
        for FailedExpunge { guid, .. } in std::mem::take(&mut self.failed_to_expunge) {
            if self.expunged.contains(&guid) || expunged_now.contains(&guid) {
                continue;
            }
            if !expunges.contains(&guid) {
                expunges.push(guid);
            }
        }

        if items.is_empty() && expunges.is_empty() {
            return None;
        }
        let (item_count, expunge_count) = (items.len(), expunges.len());
        Some(ReplayBatch {
            chunk: K::make_chunk(items, expunges),
            items: item_count,
            expunges: expunge_count,
        })
    }

    /// Merge a processing outcome into the ledger.
    ///
    /// Successes move into the processed map and clear any failure entry for
    /// the same guid. Expunged guids move into the expunged set. New
    /// failures replace older entries for the same guid.
    pub fn merge_status(&mut self, status: &Status<K>) {
        for (guid, usn) in &status.processed {
            let entry = self.processed.entry(guid.clone()).or_insert(*usn);
            if *entry < *usn {
                *entry = *usn;
            }
            self.forget_failures(guid);
        }

        for guid in &status.expunged {
            self.processed.remove(guid);
            self.forget_failures(guid);
            self.failed_to_expunge.retain(|f| &f.guid != guid);
            self.expunged.insert(guid.clone());
        }

        for failure in &status.failed_to_expunge {
            self.failed_to_expunge.retain(|f| f.guid != failure.guid);
            self.failed_to_expunge.push(failure.clone());
        }

        for failure in &status.failed_to_download {
            self.forget_failed_item(failure);
            self.failed_to_download.push(failure.clone());
        }
        for failure in &status.failed_to_process {
            self.forget_failed_item(failure);
            self.failed_to_process.push(failure.clone());
        }
        for failure in &status.cancelled {
            self.forget_failed_item(failure);
            self.cancelled.push(failure.clone());
        }
    }

    fn forget_failed_item(&mut self, failure: &FailedItem<K>) {
        match failure.guid() {
            Some(guid) => {
                let guid = guid.clone();
                self.forget_failures(&guid);
            }
            None => {
                let local_id = failure.entity.local_id();
                let same = |f: &FailedItem<K>| f.entity.local_id() == local_id;
                self.failed_to_download.retain(|f| !same(f));
                self.failed_to_process.retain(|f| !same(f));
                self.cancelled.retain(|f| !same(f));
            }
        }
    }

    fn forget_failures(&mut self, guid: &Guid) {
        let other = |f: &FailedItem<K>| f.guid() != Some(guid);
        self.failed_to_download.retain(other);
        self.failed_to_process.retain(other);
        self.cancelled.retain(other);
    }
}
