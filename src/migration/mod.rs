// ============================================================================
// Migration Engine
// ============================================================================
//
// Stages, the run state machine and the executor that drives it, plus the
// guards an upgrade holds while it runs (maintenance window, lease).
//
// ============================================================================

pub mod executor;
pub mod lease;
pub mod maintenance;
pub mod outcome;
pub mod patch;
pub mod plan;
pub mod run;
pub mod stage;
pub mod stages;

pub use executor::StagedMigrationExecutor;
pub use lease::UpgradeLease;
pub use maintenance::MaintenanceWindow;
pub use outcome::Outcome;
pub use patch::{PatchRecord, PatchUndoEntry, SettingsPatchApplier};
pub use plan::{DEFAULT_TABLES, StoreSet, UpgradePlan, build_stages};
pub use run::{MigrationRun, RunReport, RunState, StageEvent, StagePhase};
pub use stage::{AppliedRecord, FnStage, RunContext, Stage};
pub use stages::{SchemaStage, SettingsStage, TableAdditionStage, VersionStage};
