use super::patch::SettingsPatchApplier;
use super::stage::{AppliedRecord, RunContext, Stage};
use crate::changeset::{SchemaMutation, SettingsPatch, TableAddition};
use crate::core::{Result, VersionId};
use crate::storage::{KeyedStore, SchemaExecutor, SettingsStore, VersionStore};
use std::sync::Arc;
use tracing::{Level, event};

/// Runs one forward schema statement; compensation runs its backward twin.
pub struct SchemaStage {
    name: String,
    mutation: SchemaMutation,
    executor: Arc<dyn SchemaExecutor>,
}

impl SchemaStage {
    pub fn new(name: impl Into<String>, mutation: SchemaMutation, executor: Arc<dyn SchemaExecutor>) -> Self {
        Self {
            name: name.into(),
            mutation,
            executor,
        }
    }
}

impl Stage for SchemaStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, _ctx: &RunContext) -> Result<AppliedRecord> {
        event!(Level::TRACE, statement = %self.mutation.forward, "schema forward");
        self.executor.execute(&self.mutation.forward)?;
        Ok(AppliedRecord::Schema {
            backward: self.mutation.backward.clone(),
        })
    }

    fn compensate(&self, _ctx: &RunContext, record: &AppliedRecord) -> Result<()> {
        match record {
            AppliedRecord::Schema { backward } => {
                event!(Level::TRACE, statement = %backward, "schema backward");
                self.executor.execute(backward)
            }
            other => Err(other.mismatch(&self.name)),
        }
    }
}

/// Applies one collection's settings patch.
pub struct SettingsStage {
    name: String,
    patch: SettingsPatch,
    applier: SettingsPatchApplier,
}

impl SettingsStage {
    pub fn new(name: impl Into<String>, patch: SettingsPatch, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            name: name.into(),
            patch,
            applier: SettingsPatchApplier::new(store),
        }
    }
}

impl Stage for SettingsStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, _ctx: &RunContext) -> Result<AppliedRecord> {
        let record = self
            .applier
            .apply(&self.patch.collection, &self.patch.entries)?;
        Ok(AppliedRecord::Settings(record))
    }

    fn compensate(&self, _ctx: &RunContext, record: &AppliedRecord) -> Result<()> {
        match record {
            AppliedRecord::Settings(record) => self.applier.undo(&self.patch.collection, record),
            other => Err(other.mismatch(&self.name)),
        }
    }
}

/// Writes one entry into a keyed table, remembering what it replaced.
pub struct TableAdditionStage {
    name: String,
    addition: TableAddition,
    store: Arc<dyn KeyedStore>,
}

impl TableAdditionStage {
    pub fn new(name: impl Into<String>, addition: TableAddition, store: Arc<dyn KeyedStore>) -> Self {
        Self {
            name: name.into(),
            addition,
            store,
        }
    }
}

impl Stage for TableAdditionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, _ctx: &RunContext) -> Result<AppliedRecord> {
        let prior = self.store.get(&self.addition.key)?;
        self.store
            .set(&self.addition.key, self.addition.value.clone())?;
        Ok(AppliedRecord::TableEntry {
            table: self.store.name().to_string(),
            key: self.addition.key.clone(),
            prior,
        })
    }

    fn compensate(&self, _ctx: &RunContext, record: &AppliedRecord) -> Result<()> {
        match record {
            AppliedRecord::TableEntry {
                key,
                prior: Some(value),
                ..
            } => self.store.set(key, value.clone()),
            AppliedRecord::TableEntry { key, prior: None, .. } => self.store.delete(key),
            other => Err(other.mismatch(&self.name)),
        }
    }
}

/// Records the target version. Always the last stage of a run.
pub struct VersionStage {
    name: String,
    store: Arc<dyn VersionStore>,
}

impl VersionStage {
    pub fn new(to: &VersionId, store: Arc<dyn VersionStore>) -> Self {
        Self {
            name: format!("version:{}", to),
            store,
        }
    }
}

impl Stage for VersionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &RunContext) -> Result<AppliedRecord> {
        let prior = self.store.current()?;
        self.store.set_current(Some(&ctx.to))?;
        Ok(AppliedRecord::Version { prior })
    }

    fn compensate(&self, _ctx: &RunContext, record: &AppliedRecord) -> Result<()> {
        match record {
            AppliedRecord::Version { prior } => self.store.set_current(prior.as_ref()),
            other => Err(other.mismatch(&self.name)),
        }
    }
}
