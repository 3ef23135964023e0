// ============================================================================
// Staged Migration Executor
// ============================================================================
//
// Applies the stages of a run in order. When a stage fails, every stage that
// was applied before it is compensated in exact reverse order. The first
// failing compensation stops the rollback: the stages below it stay applied,
// the failing one is half undone and the ones above it are undone, which is
// reported as `Outcome::Catastrophic`.
//
// Stage failures are never retried here.
//
// ============================================================================

use super::outcome::Outcome;
use super::run::{MigrationRun, RunState};
use super::stage::RunContext;
use crate::core::{Result, UpgradeError};
use tracing::{Level, event, info_span};

#[derive(Debug, Clone, Copy, Default)]
pub struct StagedMigrationExecutor;

impl StagedMigrationExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Drives an idle run to a terminal state.
    ///
    /// # Errors
    /// Only when the run is not idle; stage and compensation failures are
    /// reported through the returned outcome.
    pub fn execute(&self, run: &mut MigrationRun) -> Result<Outcome> {
        if run.state() != RunState::Idle {
            return Err(UpgradeError::RunNotIdle(format!("{} ({})", run.id(), run.state())));
        }

        let ctx = run.context();
        let span = info_span!(
            "upgrade.run",
            run_id = %ctx.run_id,
            from = %ctx.from,
            to = %ctx.to,
            stages = run.stage_count()
        );
        let _enter = span.enter();

        run.start();
        let outcome = match self.forward(run, &ctx) {
            None => {
                event!(Level::INFO, "all stages applied");
                run.succeeded()
            }
            Some(failed) => self.reverse(run, &ctx, failed),
        };
        Ok(outcome)
    }

    /// Returns the index of the failed stage, if any.
    fn forward(&self, run: &mut MigrationRun, ctx: &RunContext) -> Option<usize> {
        for index in 0..run.stage_count() {
            run.enter_forward(index);
            let stage = run.stage(index);
            match stage.apply(ctx) {
                Ok(record) => {
                    event!(
                        Level::DEBUG,
                        index,
                        stage = stage.name(),
                        record = record.kind(),
                        "stage applied"
                    );
                    run.applied(index, record);
                }
                Err(err) => {
                    event!(
                        Level::WARN,
                        index,
                        stage = stage.name(),
                        error = %err,
                        "stage failed, rolling back"
                    );
                    run.apply_failed(index, err.to_string());
                    return Some(index);
                }
            }
        }
        None
    }

    fn reverse(&self, run: &mut MigrationRun, ctx: &RunContext, failed: usize) -> Outcome {
        let span = info_span!("upgrade.rollback", failed_at = failed);
        let _enter = span.enter();

        for index in (0..failed).rev() {
            // stages that never applied have nothing to compensate
            let Some(record) = run.record(index).cloned() else {
                continue;
            };
            run.enter_reverse(index);
            let stage = run.stage(index);
            match stage.compensate(ctx, &record) {
                Ok(()) => {
                    event!(Level::DEBUG, index, stage = stage.name(), "stage compensated");
                    run.compensated(index);
                }
                Err(err) => {
                    event!(
                        Level::ERROR,
                        index,
                        stage = stage.name(),
                        error = %err,
                        "compensation failed, system state is mixed"
                    );
                    run.compensation_failed(index, err.to_string());
                    return run.catastrophic();
                }
            }
        }

        event!(Level::WARN, "upgrade rolled back");
        run.rolled_back()
    }
}
