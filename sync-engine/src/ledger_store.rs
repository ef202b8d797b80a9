//! Persistence of processing ledgers.
//!
//! Ledgers live in a [`Settings`] map, one group per sync scope:
//!
//! ```text
//! <scope>/lastSyncData/updateCount
//! <scope>/lastSyncData/<kind>/processedGuidsAndUsns/<n>/{guid,usn}
//! <scope>/lastSyncData/<kind>/expungedGuids/<n>/guid
//! <scope>/lastSyncData/<kind>/failedToExpunge/<n>/{guid,error}
//! <scope>/lastSyncData/<kind>/failedToDownload/<n>/{entity,error}
//! <scope>/lastSyncData/<kind>/failedToProcess/<n>/{entity,error}
//! <scope>/lastSyncData/<kind>/cancelled/<n>/{entity,error}
//! ```
//!
//! Entity payloads and errors are stored as JSON strings. Every save
//! rewrites the whole map through the [`SettingsBackend`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use sync_core::{FailedExpunge, FailedItem, KindLedger};
use sync_types::{
    EntityKind, Guid, ItemError, Note, Notebook, Resource, SavedSearch, SyncEntity, Tag, Usn,
};

use crate::error::{SyncError, SyncResult};
use crate::lock;
use crate::settings::{Settings, SettingsBackend};

const LAST_SYNC_DATA: &str = "lastSyncData";
const UPDATE_COUNT: &str = "updateCount";
const PROCESSED: &str = "processedGuidsAndUsns";
const EXPUNGED: &str = "expungedGuids";
const FAILED_TO_EXPUNGE: &str = "failedToExpunge";
const FAILED_TO_DOWNLOAD: &str = "failedToDownload";
const FAILED_TO_PROCESS: &str = "failedToProcess";
const CANCELLED: &str = "cancelled";

/// Where a batch of chunks comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncScope {
    /// The account's own data.
    Own,
    /// A linked notebook shared into the account.
    Linked(Guid),
}

impl SyncScope {
    /// Settings group holding this scope's ledger.
    pub fn group(&self) -> String {
        match self {
            SyncScope::Own => "own".to_string(),
            SyncScope::Linked(guid) => format!("linked-{}", guid),
        }
    }

    /// Parse a settings group name back into a scope.
    pub fn from_group(group: &str) -> Option<Self> {
        match group {
            "own" => Some(SyncScope::Own),
            other => other
                .strip_prefix("linked-")
                .filter(|guid| !guid.is_empty())
                .map(|guid| SyncScope::Linked(Guid::new(guid))),
        }
    }

    /// Guid of the linked notebook, if this is a linked scope.
    pub fn linked_notebook_guid(&self) -> Option<&Guid> {
        match self {
            SyncScope::Own => None,
            SyncScope::Linked(guid) => Some(guid),
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group())
    }
}

/// Entry counts of one kind's ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    /// Processed guids.
    pub processed: usize,
    /// Expunged guids.
    pub expunged: usize,
    /// Guids waiting to be expunged again.
    pub failed_to_expunge: usize,
    /// Entities waiting to be downloaded again.
    pub failed_to_download: usize,
    /// Entities waiting to be processed again.
    pub failed_to_process: usize,
    /// Entities cancelled mid-flight.
    pub cancelled: usize,
}

impl<K: SyncEntity> From<&KindLedger<K>> for LedgerCounts {
    fn from(ledger: &KindLedger<K>) -> Self {
        Self {
            processed: ledger.processed.len(),
            expunged: ledger.expunged.len(),
            failed_to_expunge: ledger.failed_to_expunge.len(),
            failed_to_download: ledger.failed_to_download.len(),
            failed_to_process: ledger.failed_to_process.len(),
            cancelled: ledger.cancelled.len(),
        }
    }
}

/// Reads and writes ledgers of one account.
pub struct LedgerStore {
    backend: Arc<dyn SettingsBackend>,
    settings: Mutex<Option<Settings>>,
}

impl LedgerStore {
    /// Create a store over a settings backend. Nothing is loaded yet.
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        Self {
            backend,
            settings: Mutex::new(None),
        }
    }

    /// Load the ledger of kind `K` in `scope` (empty if never saved).
    pub async fn load<K: SyncEntity>(&self, scope: &SyncScope) -> SyncResult<KindLedger<K>> {
        self.ensure_loaded().await?;
        let mut guard = lock(&self.settings);
        let settings = guard.get_or_insert_with(Settings::new);
        enter_kind(settings, scope, K::KIND);
        let ledger = read_ledger(settings);
        leave_kind(settings);
        ledger
    }

    /// Persist the ledger of kind `K` in `scope`.
    pub async fn save<K: SyncEntity>(
        &self,
        scope: &SyncScope,
        ledger: &KindLedger<K>,
    ) -> SyncResult<()> {
        self.ensure_loaded().await?;
        let snapshot = {
            let mut guard = lock(&self.settings);
            let settings = guard.get_or_insert_with(Settings::new);
            enter_kind(settings, scope, K::KIND);
            let written = write_ledger(settings, ledger);
            leave_kind(settings);
            written?;
            settings.values().clone()
        };
        self.backend.save(&snapshot).await?;
        tracing::debug!(
            scope = %scope,
            kind = %K::KIND,
            processed = ledger.processed.len(),
            pending = ledger.pending_failures(),
            "Ledger persisted"
        );
        Ok(())
    }

    /// Highest USN fully processed in `scope` (zero if none).
    pub async fn update_count(&self, scope: &SyncScope) -> SyncResult<Usn> {
        self.ensure_loaded().await?;
        let mut guard = lock(&self.settings);
        let settings = guard.get_or_insert_with(Settings::new);
        let key = format!("{}/{}/{}", scope.group(), LAST_SYNC_DATA, UPDATE_COUNT);
        match settings.value(&key) {
            None => Ok(Usn::zero()),
            Some(raw) => raw
                .parse()
                .map(Usn::new)
                .map_err(|_| SyncError::Settings(format!("invalid {}: {:?}", key, raw))),
        }
    }

    /// Record the highest USN fully processed in `scope`.
    pub async fn set_update_count(&self, scope: &SyncScope, usn: Usn) -> SyncResult<()> {
        self.ensure_loaded().await?;
        let snapshot = {
            let mut guard = lock(&self.settings);
            let settings = guard.get_or_insert_with(Settings::new);
            let key = format!("{}/{}/{}", scope.group(), LAST_SYNC_DATA, UPDATE_COUNT);
            settings.set_value(&key, usn.value());
            settings.values().clone()
        };
        self.backend.save(&snapshot).await
    }

    /// Scopes with a persisted ledger.
    pub async fn scopes(&self) -> SyncResult<Vec<SyncScope>> {
        self.ensure_loaded().await?;
        let mut guard = lock(&self.settings);
        let settings = guard.get_or_insert_with(Settings::new);
        Ok(settings
            .child_groups()
            .iter()
            .filter_map(|g| SyncScope::from_group(g))
            .collect())
    }

    /// Entry counts of every kind in `scope`.
    pub async fn summary(&self, scope: &SyncScope) -> SyncResult<BTreeMap<EntityKind, LedgerCounts>> {
        let mut summary = BTreeMap::new();
        summary.insert(EntityKind::Tag, (&self.load::<Tag>(scope).await?).into());
        summary.insert(
            EntityKind::SavedSearch,
            (&self.load::<SavedSearch>(scope).await?).into(),
        );
        summary.insert(EntityKind::Notebook, (&self.load::<Notebook>(scope).await?).into());
        summary.insert(EntityKind::Note, (&self.load::<Note>(scope).await?).into());
        summary.insert(EntityKind::Resource, (&self.load::<Resource>(scope).await?).into());
        Ok(summary)
    }

    /// Forget everything recorded for `scope`, or for every scope.
    pub async fn reset(&self, scope: Option<&SyncScope>) -> SyncResult<()> {
        self.ensure_loaded().await?;
        let snapshot = {
            let mut guard = lock(&self.settings);
            let settings = guard.get_or_insert_with(Settings::new);
            match scope {
                Some(scope) => settings.remove(&scope.group()),
                None => *settings = Settings::new(),
            }
            settings.values().clone()
        };
        self.backend.save(&snapshot).await?;
        tracing::info!(
            scope = scope.map(|s| s.group()).unwrap_or_else(|| "all".to_string()),
            "Ledger reset"
        );
        Ok(())
    }

    async fn ensure_loaded(&self) -> SyncResult<()> {
        if lock(&self.settings).is_some() {
            return Ok(());
        }
        let values = self.backend.load().await?;
        let mut guard = lock(&self.settings);
        if guard.is_none() {
            *guard = Some(Settings::from_map(values));
        }
        Ok(())
    }
}

fn enter_kind(settings: &mut Settings, scope: &SyncScope, kind: EntityKind) {
    settings.begin_group(&scope.group());
    settings.begin_group(LAST_SYNC_DATA);
    settings.begin_group(kind.as_str());
}

fn leave_kind(settings: &mut Settings) {
    settings.end_group();
    settings.end_group();
    settings.end_group();
}

fn to_json<T: Serialize>(value: &T) -> SyncResult<String> {
    serde_json::to_string(value)
        .map_err(|e| SyncError::Settings(format!("failed to encode ledger entry: {}", e)))
}

fn from_json<T: DeserializeOwned>(raw: Option<&str>, what: &str) -> SyncResult<T> {
    let raw = raw.ok_or_else(|| SyncError::Settings(format!("ledger entry without {}", what)))?;
    serde_json::from_str(raw)
        .map_err(|e| SyncError::Settings(format!("failed to decode ledger {}: {}", what, e)))
}

fn write_ledger<K: SyncEntity>(settings: &mut Settings, ledger: &KindLedger<K>) -> SyncResult<()> {
    settings.begin_write_array(PROCESSED);
    for (i, (guid, usn)) in ledger.processed.iter().enumerate() {
        settings.set_array_index(i);
        settings.set_value("guid", guid);
        settings.set_value("usn", usn.value());
    }
    settings.end_array();

    settings.begin_write_array(EXPUNGED);
    for (i, guid) in ledger.expunged.iter().enumerate() {
        settings.set_array_index(i);
        settings.set_value("guid", guid);
    }
    settings.end_array();

    settings.begin_write_array(FAILED_TO_EXPUNGE);
    let mut result = Ok(());
    for (i, failure) in ledger.failed_to_expunge.iter().enumerate() {
        settings.set_array_index(i);
        settings.set_value("guid", &failure.guid);
        match to_json(&failure.error) {
            Ok(error) => settings.set_value("error", error),
            Err(e) => result = Err(e),
        }
    }
    settings.end_array();
    result?;

    write_failed_items(settings, FAILED_TO_DOWNLOAD, &ledger.failed_to_download)?;
    write_failed_items(settings, FAILED_TO_PROCESS, &ledger.failed_to_process)?;
    write_failed_items(settings, CANCELLED, &ledger.cancelled)?;
    Ok(())
}

fn write_failed_items<K: SyncEntity>(
    settings: &mut Settings,
    name: &str,
    items: &[FailedItem<K>],
) -> SyncResult<()> {
    let encoded: Vec<(String, String)> = items
        .iter()
        .map(|item| Ok((to_json(&item.entity)?, to_json(&item.error)?)))
        .collect::<SyncResult<_>>()?;

    settings.begin_write_array(name);
    for (i, (entity, error)) in encoded.into_iter().enumerate() {
        settings.set_array_index(i);
        settings.set_value("entity", entity);
        settings.set_value("error", error);
    }
    settings.end_array();
    Ok(())
}

fn read_ledger<K: SyncEntity>(settings: &mut Settings) -> SyncResult<KindLedger<K>> {
    let mut ledger = KindLedger::new();

    let size = settings.begin_read_array(PROCESSED);
    let mut result = Ok(());
    for i in 0..size {
        settings.set_array_index(i);
        let guid = settings.value("guid").map(Guid::new);
        let usn = settings.value("usn").and_then(|u| u.parse().ok()).map(Usn::new);
        match (guid, usn) {
            (Some(guid), Some(usn)) => {
                ledger.processed.insert(guid, usn);
            }
            _ => result = Err(SyncError::Settings(format!("malformed {} entry {}", PROCESSED, i + 1))),
        }
    }
    settings.end_array();
    result?;

    let size = settings.begin_read_array(EXPUNGED);
    for i in 0..size {
        settings.set_array_index(i);
        if let Some(guid) = settings.value("guid") {
            ledger.expunged.insert(Guid::new(guid));
        }
    }
    settings.end_array();

    let size = settings.begin_read_array(FAILED_TO_EXPUNGE);
    let mut result = Ok(());
    for i in 0..size {
        settings.set_array_index(i);
        let guid = settings.value("guid").map(Guid::new);
        let error = from_json::<ItemError>(settings.value("error"), "error");
        match (guid, error) {
            (Some(guid), Ok(error)) => ledger.failed_to_expunge.push(FailedExpunge { guid, error }),
            (None, _) => {
                result = Err(SyncError::Settings(format!(
                    "malformed {} entry {}",
                    FAILED_TO_EXPUNGE,
                    i + 1
                )))
            }
            (_, Err(e)) => result = Err(e),
        }
    }
    settings.end_array();
    result?;

    ledger.failed_to_download = read_failed_items(settings, FAILED_TO_DOWNLOAD)?;
    ledger.failed_to_process = read_failed_items(settings, FAILED_TO_PROCESS)?;
    ledger.cancelled = read_failed_items(settings, CANCELLED)?;
    Ok(ledger)
}

fn read_failed_items<K: SyncEntity>(
    settings: &mut Settings,
    name: &str,
) -> SyncResult<Vec<FailedItem<K>>> {
    let size = settings.begin_read_array(name);
    let mut items = Vec::with_capacity(size);
    let mut result = Ok(());
    for i in 0..size {
        settings.set_array_index(i);
        let entity = from_json::<K>(settings.value("entity"), "entity");
        let error = from_json::<ItemError>(settings.value("error"), "error");
        match (entity, error) {
            (Ok(entity), Ok(error)) => items.push(FailedItem::new(entity, error)),
            (Err(e), _) | (_, Err(e)) => {
                result = Err(e);
                break;
            }
        }
    }
    settings.end_array();
    result.map(|_| items)
}
