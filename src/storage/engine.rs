use crate::core::{EntryKey, Result, SettingValue, SettingsMap, VersionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a batch settings write.
///
/// Adapters that cannot write some keys list them in `rejected`; callers treat
/// a non-empty list as a failure of the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteReport {
    pub written: usize,
    pub rejected: Vec<String>,
}

impl BatchWriteReport {
    pub fn complete(written: usize) -> Self {
        Self {
            written,
            rejected: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Key/value settings grouped into named collections.
pub trait SettingsStore: Send + Sync {
    /// Full snapshot of one collection; an unknown collection is empty.
    fn get_all(&self, collection: &str) -> Result<SettingsMap>;

    /// Writes every value in one all-or-nothing batch.
    fn set_many(&self, collection: &str, values: &SettingsMap) -> Result<BatchWriteReport>;

    /// Removes every listed key in one all-or-nothing batch; missing keys are ignored.
    fn remove_many(&self, collection: &str, keys: &[String]) -> Result<()>;
}

/// Executes opaque schema statements.
///
/// A statement either applies completely or not at all. Adapters over stores
/// without that guarantee must wrap each call in their own transaction.
pub trait SchemaExecutor: Send + Sync {
    fn execute(&self, statement: &str) -> Result<()>;
}

/// Action registry, rulebook or route table.
pub trait KeyedStore: Send + Sync {
    /// Table name used by changesets to address this store.
    fn name(&self) -> &str;

    fn get(&self, key: &EntryKey) -> Result<Option<SettingValue>>;

    fn set(&self, key: &EntryKey, value: SettingValue) -> Result<()>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &EntryKey) -> Result<()>;
}

/// Holder of the advisory "upgrade in progress" flags.
pub trait MaintenanceFlagStore: Send + Sync {
    fn set_flag(&self, flag: &str, raised: bool) -> Result<()>;

    fn flag(&self, flag: &str) -> Result<bool>;
}

/// Record left behind by a run whose rollback failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InconsistencyMarker {
    pub run_id: String,
    pub from_version: VersionId,
    pub to_version: VersionId,
    pub failed_stage: Option<String>,
    pub failed_compensation: Option<String>,
    pub flagged_at: DateTime<Utc>,
}

/// Persisted current version of the upgraded system.
pub trait VersionStore: Send + Sync {
    fn current(&self) -> Result<Option<VersionId>>;

    /// Records `version` as current; `None` clears the record.
    fn set_current(&self, version: Option<&VersionId>) -> Result<()>;

    fn flag_inconsistent(&self, marker: InconsistencyMarker) -> Result<()>;

    fn inconsistency(&self) -> Result<Option<InconsistencyMarker>>;

    fn clear_inconsistency(&self) -> Result<()>;
}

/// Single-holder lease with a time-to-live.
pub trait LeaseStore: Send + Sync {
    /// Grants the lease when it is free, expired, or already held by `holder`
    /// (which renews it). Returns false when another holder owns a live lease.
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Releases the lease if `holder` owns it; otherwise does nothing.
    fn release(&self, name: &str, holder: &str) -> Result<()>;
}
