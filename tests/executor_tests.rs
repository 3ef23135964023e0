//! Executor behaviour over recorded stages and over the bundled stores.

mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use upgradekit::migration::{StagePhase, build_stages};
use upgradekit::{EntryKey, MigrationRun, Outcome, RunState, StagedMigrationExecutor};

fn run(stages: Vec<Arc<dyn upgradekit::Stage>>) -> MigrationRun {
    MigrationRun::new(v("1.0"), v("1.1"), stages)
}

#[test]
fn test_forward_completeness() {
    let log = CallLog::default();
    let mut run = run(vec![
        recording_stage("A", &log, true, true),
        recording_stage("B", &log, true, true),
        recording_stage("C", &log, true, true),
    ]);

    let outcome = StagedMigrationExecutor::new().execute(&mut run).unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(outcome.code(), 0);
    assert_eq!(run.cursor(), 3);
    assert_eq!(run.applied_count(), 3);
    assert_eq!(calls(&log), vec!["A.apply", "B.apply", "C.apply"]);
}

#[test]
fn test_failure_compensates_in_exact_reverse_order() {
    let log = CallLog::default();
    let mut run = run(vec![
        recording_stage("A", &log, true, true),
        recording_stage("B", &log, true, true),
        recording_stage("C", &log, false, true),
    ]);

    let outcome = StagedMigrationExecutor::new().execute(&mut run).unwrap();

    assert_eq!(outcome, Outcome::RolledBack);
    assert_eq!(outcome.code(), 1);
    assert_eq!(run.state(), RunState::RolledBack);
    assert_eq!(run.cursor(), -1);
    assert_eq!(
        calls(&log),
        vec!["A.apply", "B.apply", "C.apply", "B.compensate", "A.compensate"]
    );

    let phases: Vec<(usize, StagePhase, bool)> = run
        .events()
        .iter()
        .map(|e| (e.index, e.phase, e.is_ok()))
        .collect();
    assert_eq!(
        phases,
        vec![
            (0, StagePhase::Apply, true),
            (1, StagePhase::Apply, true),
            (2, StagePhase::Apply, false),
            (1, StagePhase::Compensate, true),
            (0, StagePhase::Compensate, true),
        ]
    );
}

#[test]
fn test_compensation_failure_stops_rollback() {
    let log = CallLog::default();
    let mut run = run(vec![
        recording_stage("A", &log, true, true),
        recording_stage("B", &log, true, false),
        recording_stage("C", &log, false, true),
    ]);

    let outcome = StagedMigrationExecutor::new().execute(&mut run).unwrap();

    assert_eq!(outcome, Outcome::Catastrophic);
    assert_eq!(outcome.code(), -1);
    assert!(!calls(&log).contains(&"A.compensate".to_string()));
    assert_eq!(
        calls(&log),
        vec!["A.apply", "B.apply", "C.apply", "B.compensate"]
    );

    let report = run.report().unwrap();
    assert_eq!(report.failed_stage.as_deref(), Some("C"));
    assert_eq!(report.failed_compensation.as_deref(), Some("B"));
    assert!(report.finished_at.is_some());
}

#[test]
fn test_rollback_restores_every_store() {
    let backend = seeded_backend();
    let routes = FaultyTable::new(backend.keyed_store("routes"));
    routes.fail_set.store(true, Ordering::SeqCst);
    let stores = stores(&backend).with_table(routes);

    let before = backend.snapshot().unwrap();
    let stages = build_stages(&full_changeset("1.0", "1.1"), &stores).unwrap();
    let mut run = MigrationRun::new(v("1.0"), v("1.1"), stages);

    let outcome = StagedMigrationExecutor::new().execute(&mut run).unwrap();

    assert_eq!(outcome, Outcome::RolledBack);
    assert_eq!(
        run.report().unwrap().failed_stage.as_deref(),
        Some("routes:comments/index")
    );
    assert_eq!(backend.snapshot().unwrap(), before);
}

#[test]
fn test_catastrophic_run_leaves_lower_stages_applied() {
    let backend = seeded_backend();
    let routes = FaultyTable::new(backend.keyed_store("routes"));
    routes.fail_set.store(true, Ordering::SeqCst);
    let settings = FaultySettings::new(backend.settings_store());
    settings.fail_remove.store(true, Ordering::SeqCst);

    let mut stores = stores(&backend).with_table(routes);
    stores.settings = settings;

    let stages = build_stages(&full_changeset("1.0", "1.1"), &stores).unwrap();
    let mut run = MigrationRun::new(v("1.0"), v("1.1"), stages);
    let outcome = StagedMigrationExecutor::new().execute(&mut run).unwrap();

    assert_eq!(outcome, Outcome::Catastrophic);
    assert_eq!(
        run.report().unwrap().failed_compensation.as_deref(),
        Some("settings:comments")
    );

    let state = backend.snapshot().unwrap();
    // stages above the failed compensation were undone
    assert!(
        backend
            .keyed_store("actions")
            .get(&EntryKey::new(["comments", "moderate"]).unwrap())
            .unwrap()
            .is_none()
    );
    // the failed one and everything below it stay applied
    assert_eq!(state.settings["comments"]["moderation"], serde_json::json!(true));
    assert_eq!(state.settings["core"]["theme"], serde_json::json!("dark"));
    assert!(state.schema.has_table("comments"));
    assert!(state.schema.has_column("posts", "slug"));
    // the version stage never ran
    assert_eq!(state.version, Some(v("1.0")));
}
