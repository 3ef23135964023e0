// ============================================================================
// upgradekit Library
// ============================================================================

pub mod changeset;
pub mod config;
pub mod core;
pub mod facade;
pub mod migration;
pub mod storage;
pub mod version;

// Re-export main types for convenience
pub use changeset::{
    CatalogDocument, ChangeSet, ChangeSetCatalog, SchemaMutation, SettingsPatch,
    SettingsPatchEntry, TableAddition,
};
pub use config::UpgradeConfig;
pub use crate::core::{EntryKey, Result, SettingValue, SettingsMap, UpgradeError, VersionId};
pub use facade::Upgrader;
pub use migration::{
    AppliedRecord, DEFAULT_TABLES, FnStage, MigrationRun, Outcome, PatchRecord, RunContext,
    RunReport, RunState, SettingsPatchApplier, Stage, StagedMigrationExecutor, StoreSet,
    UpgradePlan,
};
pub use storage::{
    BatchWriteReport, InconsistencyMarker, KeyedStore, LeaseStore, MaintenanceFlagStore,
    SchemaExecutor, SettingsStore, StateBackend, StateDocument, VersionStore,
};
pub use version::{VersionGraph, VersionReport, VersionResolver};

/// Builds an [`Upgrader`] over one in-memory backend with the default tables.
///
/// # Examples
///
/// ```
/// use upgradekit::{ChangeSet, ChangeSetCatalog, Outcome, SettingsPatchEntry, VersionId};
///
/// # fn main() -> upgradekit::Result<()> {
/// let v1 = VersionId::parse("1.0")?;
/// let v2 = VersionId::parse("1.1")?;
/// let catalog = ChangeSetCatalog::new().with(
///     ChangeSet::new(v1.clone(), v2.clone())
///         .with_setting("core", SettingsPatchEntry::new("theme", "dark")),
/// )?;
///
/// let (backend, upgrader) = upgradekit::in_memory(&["1.0", "1.1"], catalog)?;
/// assert_eq!(upgrader.run_upgrade(&v1), Outcome::Success);
/// assert_eq!(backend.version_store().current()?, Some(v2));
/// # Ok(())
/// # }
/// ```
pub fn in_memory<S: AsRef<str>>(
    versions: &[S],
    catalog: ChangeSetCatalog,
) -> Result<(StateBackend, Upgrader)> {
    let backend = StateBackend::in_memory();
    let stores = StoreSet::from_backend(&backend, &DEFAULT_TABLES);
    let resolver = VersionResolver::new(VersionGraph::parse_linear(versions)?);
    let upgrader = Upgrader::new(stores, resolver, catalog)?;
    Ok((backend, upgrader))
}
