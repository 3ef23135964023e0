use super::stage::Stage;
use super::stages::{SchemaStage, SettingsStage, TableAdditionStage, VersionStage};
use crate::changeset::ChangeSet;
use crate::core::{Result, UpgradeError, VersionId};
use crate::storage::{
    KeyedStore, LeaseStore, MaintenanceFlagStore, SchemaExecutor, SettingsStore, StateBackend,
    VersionStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Action registry, rulebook and route table.
pub const DEFAULT_TABLES: [&str; 3] = ["actions", "rules", "routes"];

/// Every store a run may touch.
#[derive(Clone)]
pub struct StoreSet {
    pub settings: Arc<dyn SettingsStore>,
    pub schema: Arc<dyn SchemaExecutor>,
    pub tables: BTreeMap<String, Arc<dyn KeyedStore>>,
    pub flags: Arc<dyn MaintenanceFlagStore>,
    pub versions: Arc<dyn VersionStore>,
    pub lease: Option<Arc<dyn LeaseStore>>,
}

impl StoreSet {
    /// Views of one backend, with a keyed store per listed table.
    pub fn from_backend(backend: &StateBackend, tables: &[&str]) -> Self {
        Self {
            settings: backend.settings_store(),
            schema: backend.schema_executor(),
            tables: tables
                .iter()
                .map(|name| (name.to_string(), backend.keyed_store(name)))
                .collect(),
            flags: backend.flag_store(),
            versions: backend.version_store(),
            lease: Some(backend.lease_store()),
        }
    }

    /// Adds or replaces the keyed store registered under its own name.
    pub fn with_table(mut self, store: Arc<dyn KeyedStore>) -> Self {
        self.tables.insert(store.name().to_string(), store);
        self
    }

    pub fn without_lease(mut self) -> Self {
        self.lease = None;
        self
    }

    pub fn table(&self, name: &str) -> Result<Arc<dyn KeyedStore>> {
        self.tables.get(name).cloned().ok_or_else(|| {
            UpgradeError::InvalidChangeSet(format!("Unknown table '{}'", name))
        })
    }
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSet")
            .field("tables", &self.tables.keys().collect::<Vec<_>>())
            .field("lease", &self.lease.is_some())
            .finish()
    }
}

/// Turns a changeset into its stage list.
///
/// Order: schema mutations, settings patches, table additions, then the
/// version record. Keeping the version last means an interrupted run never
/// claims the new version.
pub fn build_stages(changeset: &ChangeSet, stores: &StoreSet) -> Result<Vec<Arc<dyn Stage>>> {
    changeset.validate()?;

    let mut stages: Vec<Arc<dyn Stage>> = Vec::new();
    for (i, mutation) in changeset.schema.iter().enumerate() {
        stages.push(Arc::new(SchemaStage::new(
            format!("schema[{}]", i),
            mutation.clone(),
            Arc::clone(&stores.schema),
        )));
    }
    for patch in &changeset.settings {
        stages.push(Arc::new(SettingsStage::new(
            format!("settings:{}", patch.collection),
            patch.clone(),
            Arc::clone(&stores.settings),
        )));
    }
    for addition in &changeset.additions {
        let store = stores.table(&addition.table)?;
        stages.push(Arc::new(TableAdditionStage::new(
            format!("{}:{}", addition.table, addition.key.segments().join("/")),
            addition.clone(),
            store,
        )));
    }
    stages.push(Arc::new(VersionStage::new(
        &changeset.to,
        Arc::clone(&stores.versions),
    )));
    Ok(stages)
}

/// Dry-run view of one hop: the stages that would execute, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub from: VersionId,
    pub to: VersionId,
    pub stages: Vec<String>,
}

impl UpgradePlan {
    pub fn new(from: VersionId, to: VersionId, stages: &[Arc<dyn Stage>]) -> Self {
        Self {
            from,
            to,
            stages: stages.iter().map(|s| s.name().to_string()).collect(),
        }
    }
}
