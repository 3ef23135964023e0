// ============================================================================
// Stages
// ============================================================================
//
// A stage is one forward operation against one store plus the compensation
// that reverses it. `apply` returns an `AppliedRecord` holding whatever the
// compensation needs; the executor hands that record back unchanged.
//
// ============================================================================

use super::patch::PatchRecord;
use crate::core::{EntryKey, Result, SettingValue, UpgradeError, VersionId};
use std::sync::Arc;
use uuid::Uuid;

/// Read-only information about the run a stage executes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub from: VersionId,
    pub to: VersionId,
}

/// What a successful `apply` left behind, as needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedRecord {
    /// Prior state of every settings key the patch mutated.
    Settings(PatchRecord),

    /// The statement that reverses the applied schema mutation.
    Schema { backward: String },

    /// Prior entry of a keyed table, `None` when the key was absent.
    TableEntry {
        table: String,
        key: EntryKey,
        prior: Option<SettingValue>,
    },

    /// Version recorded before the new one was written.
    Version { prior: Option<VersionId> },

    /// Caller-defined payload for custom stages.
    Opaque(serde_json::Value),
}

impl AppliedRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            AppliedRecord::Settings(_) => "settings",
            AppliedRecord::Schema { .. } => "schema",
            AppliedRecord::TableEntry { .. } => "table_entry",
            AppliedRecord::Version { .. } => "version",
            AppliedRecord::Opaque(_) => "opaque",
        }
    }

    /// Error for a compensation handed a record another kind of stage produced.
    pub(crate) fn mismatch(&self, stage: &str) -> UpgradeError {
        UpgradeError::CompensationFailure {
            stage: stage.to_string(),
            message: format!("unexpected {} record", self.kind()),
        }
    }
}

/// One forward/compensating pair of operations in a migration run.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, ctx: &RunContext) -> Result<AppliedRecord>;

    fn compensate(&self, ctx: &RunContext, record: &AppliedRecord) -> Result<()>;
}

pub type ApplyFn = Arc<dyn Fn(&RunContext) -> Result<AppliedRecord> + Send + Sync>;
pub type CompensateFn = Arc<dyn Fn(&RunContext, &AppliedRecord) -> Result<()> + Send + Sync>;

/// Stage built from a pair of closures.
#[derive(Clone)]
pub struct FnStage {
    name: String,
    apply: ApplyFn,
    compensate: CompensateFn,
}

impl FnStage {
    pub fn new<A, C>(name: impl Into<String>, apply: A, compensate: C) -> Self
    where
        A: Fn(&RunContext) -> Result<AppliedRecord> + Send + Sync + 'static,
        C: Fn(&RunContext, &AppliedRecord) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
            compensate: Arc::new(compensate),
        }
    }
}

impl std::fmt::Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &RunContext) -> Result<AppliedRecord> {
        (self.apply)(ctx)
    }

    fn compensate(&self, ctx: &RunContext, record: &AppliedRecord) -> Result<()> {
        (self.compensate)(ctx, record)
    }
}
