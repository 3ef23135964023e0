use crate::changeset::ChangeSetCatalog;
use crate::config::UpgradeConfig;
use crate::core::{Result, UpgradeError, VersionId};
use crate::migration::{
    MaintenanceWindow, MigrationRun, Outcome, RunReport, StagedMigrationExecutor, StoreSet,
    UpgradeLease, UpgradePlan, build_stages,
};
use crate::storage::InconsistencyMarker;
use crate::version::{VersionReport, VersionResolver};
use chrono::Utc;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Front door of the crate: resolves the next hop, guards it with the lease
/// and the maintenance window, and runs its changeset.
pub struct Upgrader {
    stores: StoreSet,
    resolver: VersionResolver,
    catalog: ChangeSetCatalog,
    config: UpgradeConfig,
    executor: StagedMigrationExecutor,
}

impl Upgrader {
    /// Fails when a changeset does not match an edge of the version graph.
    pub fn new(stores: StoreSet, resolver: VersionResolver, catalog: ChangeSetCatalog) -> Result<Self> {
        catalog.check_against(&resolver)?;
        Ok(Self {
            stores,
            resolver,
            catalog,
            config: UpgradeConfig::default(),
            executor: StagedMigrationExecutor::new(),
        })
    }

    pub fn with_config(mut self, config: UpgradeConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &VersionResolver {
        &self.resolver
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    pub fn describe_versions(&self) -> Result<VersionReport> {
        let current = self.stores.versions.current()?;
        Ok(VersionReport::build(&self.resolver, current))
    }

    /// Stages the next hop from `current` would run. Touches no store.
    pub fn plan(&self, current: &VersionId) -> Result<Option<UpgradePlan>> {
        let Some(next) = self.resolver.resolve_next(current) else {
            return Ok(None);
        };
        let changeset = self.catalog.changeset_for(current, &next);
        let stages = build_stages(&changeset, &self.stores)?;
        Ok(Some(UpgradePlan::new(current.clone(), next, &stages)))
    }

    /// Runs one hop and returns only its outcome.
    ///
    /// A failure before the first stage leaves nothing applied and is reported
    /// as `RolledBack` after being logged.
    pub fn run_upgrade(&self, current: &VersionId) -> Outcome {
        match self.run_upgrade_report(current) {
            Ok(report) => report.outcome,
            Err(err) => {
                event!(
                    Level::ERROR,
                    from = %current,
                    error = %err,
                    "upgrade aborted before any stage ran"
                );
                Outcome::RolledBack
            }
        }
    }

    /// Runs one hop from `current`.
    ///
    /// # Errors
    /// Pre-flight failures: an invalid changeset, an unavailable lease, an
    /// inconsistency marker, a recorded version other than `current` or a
    /// maintenance flag that cannot be raised. A system with no recorded
    /// version accepts any `current`.
    pub fn run_upgrade_report(&self, current: &VersionId) -> Result<RunReport> {
        let Some(next) = self.resolver.resolve_next(current) else {
            event!(Level::INFO, from = %current, "no upgrade path");
            return Ok(RunReport::no_upgrade_path(current.clone()));
        };

        let span = info_span!("upgrade.hop", from = %current, to = %next);
        let _enter = span.enter();

        let changeset = self.catalog.changeset_for(current, &next);
        let stages = build_stages(&changeset, &self.stores)?;

        let lease = self.acquire_lease()?;
        if let Some(marker) = self.stores.versions.inconsistency()? {
            return Err(UpgradeError::InconsistentState(format!(
                "run {} failed {} -> {} and must be repaired first",
                marker.run_id, marker.from_version, marker.to_version
            )));
        }
        if let Some(recorded) = self.stores.versions.current()? {
            if &recorded != current {
                return Err(UpgradeError::VersionMismatch {
                    recorded: recorded.to_string(),
                    requested: current.to_string(),
                });
            }
        }

        let window = MaintenanceWindow::enter(
            Arc::clone(&self.stores.flags),
            self.config.maintenance_flag.as_str(),
        )?;

        let mut run = MigrationRun::new(current.clone(), next, stages);
        let outcome = self.executor.execute(&mut run)?;
        let report = run
            .report()
            .ok_or_else(|| UpgradeError::RunNotIdle(format!("{} did not finish", run.id())))?;

        if outcome == Outcome::Catastrophic {
            self.flag_inconsistent(&report);
        }

        if let Err(err) = window.exit() {
            event!(Level::ERROR, error = %err, "maintenance flag left raised");
        }
        if let Some(lease) = lease {
            if let Err(err) = lease.release() {
                event!(Level::ERROR, error = %err, "upgrade lease not released");
            }
        }

        event!(Level::INFO, outcome = %outcome, code = outcome.code(), "upgrade finished");
        Ok(report)
    }

    /// Upgrades hop by hop from the recorded version until the latest version
    /// is reached or a hop does not succeed.
    pub fn run_to_latest(&self) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();
        loop {
            let current = self.stores.versions.current()?.ok_or_else(|| {
                UpgradeError::NoUpgradePath("no version is recorded".to_string())
            })?;
            if !reports.is_empty() && self.resolver.resolve_next(&current).is_none() {
                break;
            }

            let report = self.run_upgrade_report(&current)?;
            let succeeded = report.outcome.is_success();
            reports.push(report);
            if !succeeded {
                break;
            }
        }
        Ok(reports)
    }

    /// Removes the marker left by a catastrophic run, returning it.
    pub fn clear_inconsistency(&self) -> Result<Option<InconsistencyMarker>> {
        let marker = self.stores.versions.inconsistency()?;
        if let Some(marker) = &marker {
            self.stores.versions.clear_inconsistency()?;
            event!(
                Level::WARN,
                run_id = %marker.run_id,
                "inconsistency marker cleared by operator"
            );
        }
        Ok(marker)
    }

    fn acquire_lease(&self) -> Result<Option<UpgradeLease>> {
        match &self.stores.lease {
            Some(store) => UpgradeLease::acquire(
                Arc::clone(store),
                self.config.lease_name.as_str(),
                self.config.lease_holder.as_str(),
                self.config.lease_ttl(),
            )
            .map(Some),
            None if self.config.require_lease => Err(UpgradeError::LeaseUnavailable(
                "no lease store is configured".to_string(),
            )),
            None => Ok(None),
        }
    }

    fn flag_inconsistent(&self, report: &RunReport) {
        let (Some(run_id), Some(to)) = (report.run_id, report.to.clone()) else {
            return;
        };
        let marker = InconsistencyMarker {
            run_id: run_id.to_string(),
            from_version: report.from.clone(),
            to_version: to,
            failed_stage: report.failed_stage.clone(),
            failed_compensation: report.failed_compensation.clone(),
            flagged_at: Utc::now(),
        };
        match self.stores.versions.flag_inconsistent(marker) {
            Ok(()) => event!(
                Level::ERROR,
                run_id = %run_id,
                "catastrophic upgrade, system flagged inconsistent"
            ),
            Err(err) => event!(
                Level::ERROR,
                run_id = %run_id,
                error = %err,
                "catastrophic upgrade and the inconsistency marker could not be written"
            ),
        }
    }
}

impl std::fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrader")
            .field("stores", &self.stores)
            .field("versions", &self.resolver.graph().all_versions())
            .field("changesets", &self.catalog.len())
            .field("config", &self.config)
            .finish()
    }
}
