// ============================================================================
// Migration Run
// ============================================================================
//
// One upgrade attempt: a fixed stage list, a cursor and the applied records.
// A run moves through the states below exactly once and is discarded after
// reaching a terminal state.
//
//   Idle ──> Forward(i) ──> Success
//                │
//                └──> FailedAt(i) ──> Reverse(j) ──> RolledBack
//                                         │
//                                         └──> Catastrophic
//
// ============================================================================

use super::outcome::Outcome;
use super::stage::{AppliedRecord, RunContext, Stage};
use crate::core::VersionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Forward(usize),
    FailedAt(usize),
    Reverse(usize),
    Success,
    RolledBack,
    Catastrophic,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Success | RunState::RolledBack | RunState::Catastrophic
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "IDLE"),
            RunState::Forward(i) => write!(f, "FORWARD({})", i),
            RunState::FailedAt(i) => write!(f, "FAILED_AT({})", i),
            RunState::Reverse(j) => write!(f, "REVERSE({})", j),
            RunState::Success => write!(f, "SUCCESS"),
            RunState::RolledBack => write!(f, "ROLLED_BACK"),
            RunState::Catastrophic => write!(f, "CATASTROPHIC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Apply,
    Compensate,
}

/// Journal line for one apply or compensate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub index: usize,
    pub stage: String,
    pub phase: StagePhase,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl StageEvent {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Diagnostics of a finished attempt. Only `outcome` is a stable contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Option<Uuid>,
    pub from: VersionId,
    pub to: Option<VersionId>,
    pub outcome: Outcome,
    pub stages: Vec<String>,
    pub failed_stage: Option<String>,
    pub failed_compensation: Option<String>,
    pub events: Vec<StageEvent>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Report for a version without successor; no run was created.
    pub fn no_upgrade_path(from: VersionId) -> Self {
        Self {
            run_id: None,
            from,
            to: None,
            outcome: Outcome::NoUpgradePath,
            stages: Vec::new(),
            failed_stage: None,
            failed_compensation: None,
            events: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn code(&self) -> i32 {
        self.outcome.code()
    }
}

pub struct MigrationRun {
    id: Uuid,
    from: VersionId,
    to: VersionId,
    stages: Vec<Arc<dyn Stage>>,
    /// Next stage to apply going forward, next stage to compensate going back.
    cursor: isize,
    records: BTreeMap<usize, AppliedRecord>,
    state: RunState,
    outcome: Option<Outcome>,
    failed_stage: Option<usize>,
    failed_compensation: Option<usize>,
    events: Vec<StageEvent>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl MigrationRun {
    /// The stage list is fixed here and never changes for the life of the run.
    pub fn new(from: VersionId, to: VersionId, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from,
            to,
            stages,
            cursor: 0,
            records: BTreeMap::new(),
            state: RunState::Idle,
            outcome: None,
            failed_stage: None,
            failed_compensation: None,
            events: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn from_version(&self) -> &VersionId {
        &self.from
    }

    pub fn to_version(&self) -> &VersionId {
        &self.to
    }

    pub fn context(&self) -> RunContext {
        RunContext {
            run_id: self.id,
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    /// Applied record of stage `index`, present iff its `apply` succeeded.
    pub fn record(&self, index: usize) -> Option<&AppliedRecord> {
        self.records.get(&index)
    }

    pub fn applied_count(&self) -> usize {
        self.records.len()
    }

    pub fn events(&self) -> &[StageEvent] {
        &self.events
    }

    pub fn failed_stage(&self) -> Option<usize> {
        self.failed_stage
    }

    pub fn failed_compensation(&self) -> Option<usize> {
        self.failed_compensation
    }

    /// Diagnostics of the attempt, once it reached a terminal state.
    pub fn report(&self) -> Option<RunReport> {
        let outcome = self.outcome?;
        let name_of = |index: Option<usize>| {
            index.and_then(|i| self.stages.get(i).map(|s| s.name().to_string()))
        };
        Some(RunReport {
            run_id: Some(self.id),
            from: self.from.clone(),
            to: Some(self.to.clone()),
            outcome,
            stages: self.stage_names(),
            failed_stage: name_of(self.failed_stage),
            failed_compensation: name_of(self.failed_compensation),
            events: self.events.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }

    // ------------------------------------------------------------------
    // Transitions, driven by the executor
    // ------------------------------------------------------------------

    pub(super) fn stage(&self, index: usize) -> Arc<dyn Stage> {
        Arc::clone(&self.stages[index])
    }

    pub(super) fn start(&mut self) {
        debug_assert_eq!(self.state, RunState::Idle);
        self.started_at = Some(Utc::now());
        self.cursor = 0;
    }

    pub(super) fn enter_forward(&mut self, index: usize) {
        debug_assert!(index as isize >= self.cursor);
        self.state = RunState::Forward(index);
    }

    pub(super) fn applied(&mut self, index: usize, record: AppliedRecord) {
        self.log(index, StagePhase::Apply, None);
        self.records.insert(index, record);
        self.advance_to(index as isize + 1);
    }

    pub(super) fn apply_failed(&mut self, index: usize, error: String) {
        self.log(index, StagePhase::Apply, Some(error));
        self.failed_stage = Some(index);
        self.state = RunState::FailedAt(index);
    }

    pub(super) fn enter_reverse(&mut self, index: usize) {
        self.retreat_to(index as isize);
        self.state = RunState::Reverse(index);
    }

    pub(super) fn compensated(&mut self, index: usize) {
        self.log(index, StagePhase::Compensate, None);
        self.retreat_to(index as isize - 1);
    }

    pub(super) fn compensation_failed(&mut self, index: usize, error: String) {
        self.log(index, StagePhase::Compensate, Some(error));
        self.failed_compensation = Some(index);
    }

    pub(super) fn succeeded(&mut self) -> Outcome {
        self.close(RunState::Success, Outcome::Success)
    }

    pub(super) fn rolled_back(&mut self) -> Outcome {
        self.cursor = -1;
        self.close(RunState::RolledBack, Outcome::RolledBack)
    }

    pub(super) fn catastrophic(&mut self) -> Outcome {
        self.close(RunState::Catastrophic, Outcome::Catastrophic)
    }

    fn close(&mut self, state: RunState, outcome: Outcome) -> Outcome {
        self.state = state;
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        outcome
    }

    fn advance_to(&mut self, cursor: isize) {
        debug_assert!(cursor >= self.cursor, "cursor moved backwards while applying");
        self.cursor = cursor;
    }

    fn retreat_to(&mut self, cursor: isize) {
        debug_assert!(cursor <= self.cursor, "cursor moved forwards while compensating");
        self.cursor = cursor;
    }

    fn log(&mut self, index: usize, phase: StagePhase, error: Option<String>) {
        self.events.push(StageEvent {
            index,
            stage: self.stages[index].name().to_string(),
            phase,
            error,
            at: Utc::now(),
        });
    }
}

impl std::fmt::Debug for MigrationRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRun")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("stages", &self.stage_names())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}
