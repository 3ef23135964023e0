//! Shared fixtures: fault-injecting store wrappers and call recorders.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use upgradekit::{
    AppliedRecord, BatchWriteReport, ChangeSet, ChangeSetCatalog, EntryKey, FnStage,
    KeyedStore, MaintenanceFlagStore, Result, SchemaExecutor, SettingValue, SettingsMap,
    SettingsPatchEntry, SettingsStore, Stage, StateBackend, StoreSet, UpgradeError, VersionGraph,
    VersionId, VersionResolver, DEFAULT_TABLES,
};

pub fn v(s: &str) -> VersionId {
    VersionId::parse(s).unwrap()
}

pub fn resolver(versions: &[&str]) -> VersionResolver {
    VersionResolver::new(VersionGraph::parse_linear(versions).unwrap())
}

/// Backend seeded with version 1.0, a settings collection and one route.
pub fn seeded_backend() -> StateBackend {
    let backend = StateBackend::in_memory();
    backend.version_store().set_current(Some(&v("1.0"))).unwrap();

    let mut core = SettingsMap::new();
    core.insert("theme".to_string(), "light".into());
    core.insert("per_page".to_string(), 10.into());
    backend.settings_store().set_many("core", &core).unwrap();

    backend
        .keyed_store("routes")
        .set(&EntryKey::new(["blog", "index"]).unwrap(), "/blog".into())
        .unwrap();
    backend
        .schema_executor()
        .execute("CREATE TABLE posts (id INTEGER, title TEXT)")
        .unwrap();
    backend
}

/// Changeset touching every kind of store.
pub fn full_changeset(from: &str, to: &str) -> ChangeSet {
    ChangeSet::new(v(from), v(to))
        .with_schema(
            "CREATE TABLE comments (id INTEGER, body TEXT)",
            "DROP TABLE comments",
        )
        .with_schema(
            "ALTER TABLE posts ADD COLUMN slug TEXT",
            "ALTER TABLE posts DROP COLUMN slug",
        )
        .with_setting("core", SettingsPatchEntry::new("theme", "dark"))
        .with_setting("core", SettingsPatchEntry::new("per_page", 50).keep_existing())
        .with_setting("comments", SettingsPatchEntry::new("moderation", true))
        .with_addition(
            "actions",
            EntryKey::new(["comments", "moderate"]).unwrap(),
            serde_json::json!({"level": "admin"}),
        )
        .with_addition(
            "rules",
            EntryKey::new(["comments", "post"]).unwrap(),
            serde_json::json!({"allow": ["member"]}),
        )
        .with_addition(
            "routes",
            EntryKey::new(["comments", "index"]).unwrap(),
            "/comments",
        )
}

pub fn catalog(changesets: Vec<ChangeSet>) -> ChangeSetCatalog {
    let mut catalog = ChangeSetCatalog::new();
    for changeset in changesets {
        catalog.register(changeset).unwrap();
    }
    catalog
}

pub fn stores(backend: &StateBackend) -> StoreSet {
    StoreSet::from_backend(backend, &DEFAULT_TABLES)
}

// ------------------------------------------------------------------
// Call recording
// ------------------------------------------------------------------

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Stage that records `NAME.apply` / `NAME.compensate` and fails on demand.
pub fn recording_stage(
    name: &str,
    log: &CallLog,
    apply_ok: bool,
    compensate_ok: bool,
) -> Arc<dyn Stage> {
    let apply_log = Arc::clone(log);
    let compensate_log = Arc::clone(log);
    let apply_name = name.to_string();
    let compensate_name = name.to_string();
    Arc::new(FnStage::new(
        name,
        move |_| {
            apply_log
                .lock()
                .unwrap()
                .push(format!("{}.apply", apply_name));
            if apply_ok {
                Ok(AppliedRecord::Opaque(serde_json::Value::Null))
            } else {
                Err(UpgradeError::adapter(apply_name.as_str(), "injected apply failure"))
            }
        },
        move |_, _| {
            compensate_log
                .lock()
                .unwrap()
                .push(format!("{}.compensate", compensate_name));
            if compensate_ok {
                Ok(())
            } else {
                Err(UpgradeError::adapter(
                    compensate_name.as_str(),
                    "injected compensation failure",
                ))
            }
        },
    ))
}

// ------------------------------------------------------------------
// Fault-injecting wrappers
// ------------------------------------------------------------------

/// Fails every statement containing `needle` while armed.
pub struct FailingSchema {
    inner: Arc<dyn SchemaExecutor>,
    needle: String,
    pub armed: AtomicBool,
}

impl FailingSchema {
    pub fn new(inner: Arc<dyn SchemaExecutor>, needle: &str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            needle: needle.to_string(),
            armed: AtomicBool::new(true),
        })
    }
}

impl SchemaExecutor for FailingSchema {
    fn execute(&self, statement: &str) -> Result<()> {
        if self.armed.load(Ordering::SeqCst) && statement.contains(&self.needle) {
            return Err(UpgradeError::adapter("schema", format!("refused: {}", statement)));
        }
        self.inner.execute(statement)
    }
}

/// Settings store that can reject keys or refuse removals.
pub struct FaultySettings {
    inner: Arc<dyn SettingsStore>,
    rejected: Mutex<BTreeSet<String>>,
    pub fail_remove: AtomicBool,
    pub set_calls: Mutex<usize>,
}

impl FaultySettings {
    pub fn new(inner: Arc<dyn SettingsStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            rejected: Mutex::new(BTreeSet::new()),
            fail_remove: AtomicBool::new(false),
            set_calls: Mutex::new(0),
        })
    }

    pub fn reject(&self, key: &str) {
        self.rejected.lock().unwrap().insert(key.to_string());
    }
}

impl SettingsStore for FaultySettings {
    fn get_all(&self, collection: &str) -> Result<SettingsMap> {
        self.inner.get_all(collection)
    }

    fn set_many(&self, collection: &str, values: &SettingsMap) -> Result<BatchWriteReport> {
        *self.set_calls.lock().unwrap() += 1;
        let rejected: Vec<String> = {
            let reject = self.rejected.lock().unwrap();
            values.keys().filter(|k| reject.contains(*k)).cloned().collect()
        };
        if !rejected.is_empty() {
            // all-or-nothing: nothing is written when any key is rejected
            return Ok(BatchWriteReport {
                written: 0,
                rejected,
            });
        }
        self.inner.set_many(collection, values)
    }

    fn remove_many(&self, collection: &str, keys: &[String]) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(UpgradeError::adapter("settings", "remove refused"));
        }
        self.inner.remove_many(collection, keys)
    }
}

/// Keyed table whose writes can be switched off.
pub struct FaultyTable {
    inner: Arc<dyn KeyedStore>,
    pub fail_set: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FaultyTable {
    pub fn new(inner: Arc<dyn KeyedStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_set: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        })
    }
}

impl KeyedStore for FaultyTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &EntryKey) -> Result<Option<SettingValue>> {
        self.inner.get(key)
    }

    fn set(&self, key: &EntryKey, value: SettingValue) -> Result<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(UpgradeError::adapter(self.name(), "write refused"));
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &EntryKey) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(UpgradeError::adapter(self.name(), "delete refused"));
        }
        self.inner.delete(key)
    }
}

/// Flag store that can refuse to raise or to lower, recording every call.
pub struct FaultyFlags {
    inner: Arc<dyn MaintenanceFlagStore>,
    pub fail_raise: AtomicBool,
    pub fail_lower: AtomicBool,
    pub log: CallLog,
}

impl FaultyFlags {
    pub fn new(inner: Arc<dyn MaintenanceFlagStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_raise: AtomicBool::new(false),
            fail_lower: AtomicBool::new(false),
            log: CallLog::default(),
        })
    }
}

impl MaintenanceFlagStore for FaultyFlags {
    fn set_flag(&self, flag: &str, raised: bool) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}={}", flag, raised));
        let refuse = if raised {
            self.fail_raise.load(Ordering::SeqCst)
        } else {
            self.fail_lower.load(Ordering::SeqCst)
        };
        if refuse {
            return Err(UpgradeError::adapter("flags", "flag store unavailable"));
        }
        self.inner.set_flag(flag, raised)
    }

    fn flag(&self, flag: &str) -> Result<bool> {
        self.inner.flag(flag)
    }
}
