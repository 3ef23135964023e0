use super::engine::{
    BatchWriteReport, InconsistencyMarker, KeyedStore, LeaseStore, MaintenanceFlagStore,
    SchemaExecutor, SettingsStore, VersionStore,
};
use super::persistence::{StateFile, StateLock};
use super::schema::SchemaCatalog;
use crate::core::{EntryKey, Result, SettingValue, SettingsMap, UpgradeError, VersionId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// Rows of one keyed table (action registry, rulebook, route table).
pub type TableRows = BTreeMap<EntryKey, SettingValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything the bundled adapters store, as one serializable document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub settings: BTreeMap<String, SettingsMap>,
    #[serde(default, with = "table_rows")]
    pub tables: BTreeMap<String, TableRows>,
    #[serde(default)]
    pub schema: SchemaCatalog,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub version: Option<VersionId>,
    #[serde(default)]
    pub inconsistency: Option<InconsistencyMarker>,
    #[serde(default)]
    pub leases: BTreeMap<String, LeaseRecord>,
}

impl StateDocument {
    /// Drops empty settings collections and tables.
    ///
    /// Adapters never leave an empty container behind, so a document in this
    /// form compares equal before a run and after its full rollback.
    pub fn prune_empty(&mut self) {
        self.settings.retain(|_, values| !values.is_empty());
        self.tables.retain(|_, rows| !rows.is_empty());
    }
}

/// Shared state behind every bundled adapter.
///
/// Each adapter call is one all-or-nothing mutation of the document. When the
/// backend is file-backed the document is saved after every mutation; a failed
/// save restores the previous in-memory document and fails the call.
///
/// A file-backed backend holds an exclusive lock on the state file for as long
/// as any clone of it is alive, so a second backend on the same path, in this
/// process or another, cannot be opened until the first is dropped.
#[derive(Clone)]
pub struct StateBackend {
    inner: Arc<BackendInner>,
}

struct BackendInner {
    state: RwLock<StateDocument>,
    file: Option<StateFile>,
    _lock: Option<StateLock>,
    statement_log: Mutex<Vec<String>>,
}

impl StateBackend {
    pub fn in_memory() -> Self {
        Self::from_document(StateDocument::default())
    }

    pub fn from_document(mut document: StateDocument) -> Self {
        document.prune_empty();
        Self::build(document, None, None)
    }

    /// Opens a file-backed backend; a missing file starts from an empty document.
    ///
    /// # Errors
    /// `LeaseUnavailable` while another backend holds the state file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = StateFile::new(path);
        let lock = file.lock()?;
        let mut document = file.load()?.unwrap_or_default();
        document.prune_empty();
        Ok(Self::build(document, Some(file), Some(lock)))
    }

    fn build(document: StateDocument, file: Option<StateFile>, lock: Option<StateLock>) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                state: RwLock::new(document),
                file,
                _lock: lock,
                statement_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Copy of the current document.
    pub fn snapshot(&self) -> Result<StateDocument> {
        Ok(self.inner.state.read()?.clone())
    }

    /// Schema statements executed through this backend, in order.
    pub fn executed_statements(&self) -> Result<Vec<String>> {
        Ok(self.inner.statement_log.lock()?.clone())
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.file.is_some()
    }

    fn read<T>(&self, f: impl FnOnce(&StateDocument) -> T) -> Result<T> {
        let state = self.inner.state.read()?;
        Ok(f(&state))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StateDocument) -> Result<T>) -> Result<T> {
        let mut state = self.inner.state.write()?;
        let mut staged = state.clone();
        let value = f(&mut staged)?;
        if let Some(file) = &self.inner.file {
            file.save(&staged)?;
        }
        *state = staged;
        Ok(value)
    }

    pub fn settings_store(&self) -> Arc<dyn SettingsStore> {
        Arc::new(BackendSettings {
            backend: self.clone(),
        })
    }

    pub fn schema_executor(&self) -> Arc<dyn SchemaExecutor> {
        Arc::new(BackendSchema {
            backend: self.clone(),
        })
    }

    pub fn keyed_store(&self, table: &str) -> Arc<dyn KeyedStore> {
        Arc::new(BackendTable {
            backend: self.clone(),
            table: table.to_string(),
        })
    }

    pub fn flag_store(&self) -> Arc<dyn MaintenanceFlagStore> {
        Arc::new(BackendFlags {
            backend: self.clone(),
        })
    }

    pub fn version_store(&self) -> Arc<dyn VersionStore> {
        Arc::new(BackendVersion {
            backend: self.clone(),
        })
    }

    pub fn lease_store(&self) -> Arc<dyn LeaseStore> {
        Arc::new(BackendLeases {
            backend: self.clone(),
        })
    }
}

struct BackendSettings {
    backend: StateBackend,
}

impl SettingsStore for BackendSettings {
    fn get_all(&self, collection: &str) -> Result<SettingsMap> {
        self.backend
            .read(|state| state.settings.get(collection).cloned().unwrap_or_default())
    }

    fn set_many(&self, collection: &str, values: &SettingsMap) -> Result<BatchWriteReport> {
        if values.is_empty() {
            return Ok(BatchWriteReport::complete(0));
        }
        self.backend.mutate(|state| {
            let target = state.settings.entry(collection.to_string()).or_default();
            for (key, value) in values {
                target.insert(key.clone(), value.clone());
            }
            Ok(BatchWriteReport::complete(values.len()))
        })
    }

    fn remove_many(&self, collection: &str, keys: &[String]) -> Result<()> {
        self.backend.mutate(|state| {
            if let Some(target) = state.settings.get_mut(collection) {
                for key in keys {
                    target.remove(key);
                }
                if target.is_empty() {
                    state.settings.remove(collection);
                }
            }
            Ok(())
        })
    }
}

struct BackendSchema {
    backend: StateBackend,
}

impl SchemaExecutor for BackendSchema {
    fn execute(&self, statement: &str) -> Result<()> {
        self.backend
            .mutate(|state| state.schema.execute(statement))?;
        self.backend
            .inner
            .statement_log
            .lock()?
            .push(statement.to_string());
        Ok(())
    }
}

struct BackendTable {
    backend: StateBackend,
    table: String,
}

impl KeyedStore for BackendTable {
    fn name(&self) -> &str {
        &self.table
    }

    fn get(&self, key: &EntryKey) -> Result<Option<SettingValue>> {
        self.backend.read(|state| {
            state
                .tables
                .get(&self.table)
                .and_then(|rows| rows.get(key))
                .cloned()
        })
    }

    fn set(&self, key: &EntryKey, value: SettingValue) -> Result<()> {
        self.backend.mutate(|state| {
            state
                .tables
                .entry(self.table.clone())
                .or_default()
                .insert(key.clone(), value);
            Ok(())
        })
    }

    fn delete(&self, key: &EntryKey) -> Result<()> {
        self.backend.mutate(|state| {
            if let Some(rows) = state.tables.get_mut(&self.table) {
                rows.remove(key);
                if rows.is_empty() {
                    state.tables.remove(&self.table);
                }
            }
            Ok(())
        })
    }
}

struct BackendFlags {
    backend: StateBackend,
}

impl MaintenanceFlagStore for BackendFlags {
    fn set_flag(&self, flag: &str, raised: bool) -> Result<()> {
        self.backend.mutate(|state| {
            if raised {
                state.flags.insert(flag.to_string(), true);
            } else {
                state.flags.remove(flag);
            }
            Ok(())
        })
    }

    fn flag(&self, flag: &str) -> Result<bool> {
        self.backend
            .read(|state| state.flags.get(flag).copied().unwrap_or(false))
    }
}

struct BackendVersion {
    backend: StateBackend,
}

impl VersionStore for BackendVersion {
    fn current(&self) -> Result<Option<VersionId>> {
        self.backend.read(|state| state.version.clone())
    }

    fn set_current(&self, version: Option<&VersionId>) -> Result<()> {
        self.backend.mutate(|state| {
            state.version = version.cloned();
            Ok(())
        })
    }

    fn flag_inconsistent(&self, marker: InconsistencyMarker) -> Result<()> {
        self.backend.mutate(|state| {
            state.inconsistency = Some(marker);
            Ok(())
        })
    }

    fn inconsistency(&self) -> Result<Option<InconsistencyMarker>> {
        self.backend.read(|state| state.inconsistency.clone())
    }

    fn clear_inconsistency(&self) -> Result<()> {
        self.backend.mutate(|state| {
            state.inconsistency = None;
            Ok(())
        })
    }
}

struct BackendLeases {
    backend: StateBackend,
}

impl LeaseStore for BackendLeases {
    fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
        if ttl <= Duration::zero() {
            return Err(UpgradeError::ConfigError(format!(
                "Lease '{}' needs a positive TTL",
                name
            )));
        }
        let now = Utc::now();
        self.backend.mutate(|state| {
            if let Some(existing) = state.leases.get(name) {
                if existing.holder != holder && existing.expires_at > now {
                    return Ok(false);
                }
            }
            state.leases.insert(
                name.to_string(),
                LeaseRecord {
                    holder: holder.to_string(),
                    expires_at: now + ttl,
                },
            );
            Ok(true)
        })
    }

    fn release(&self, name: &str, holder: &str) -> Result<()> {
        self.backend.mutate(|state| {
            if state
                .leases
                .get(name)
                .is_some_and(|lease| lease.holder == holder)
            {
                state.leases.remove(name);
            }
            Ok(())
        })
    }
}

/// JSON object keys must be strings, so keyed tables are stored as row lists.
mod table_rows {
    use super::TableRows;
    use crate::core::{EntryKey, SettingValue};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct RowRef<'a> {
        key: &'a EntryKey,
        value: &'a SettingValue,
    }

    #[derive(Deserialize)]
    struct Row {
        key: EntryKey,
        value: SettingValue,
    }

    pub fn serialize<S>(
        tables: &BTreeMap<String, TableRows>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rows: BTreeMap<&String, Vec<RowRef<'_>>> = tables
            .iter()
            .map(|(table, rows)| {
                let rows = rows
                    .iter()
                    .map(|(key, value)| RowRef { key, value })
                    .collect();
                (table, rows)
            })
            .collect();
        rows.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, TableRows>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let rows: BTreeMap<String, Vec<Row>> = BTreeMap::deserialize(deserializer)?;
        Ok(rows
            .into_iter()
            .map(|(table, rows)| {
                let rows = rows.into_iter().map(|row| (row.key, row.value)).collect();
                (table, rows)
            })
            .collect())
    }
}
