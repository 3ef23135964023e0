//! File-backed state and JSON catalogs, the way the command-line tool uses them.

mod common;

use common::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use upgradekit::{
    CatalogDocument, EntryKey, Outcome, StateBackend, StoreSet, UpgradeConfig, UpgradeError,
    Upgrader, DEFAULT_TABLES,
};

const CATALOG: &str = r#"{
    "versions": ["1.0", "1.1", "2.0"],
    "changesets": [
        {
            "from": "1.0",
            "to": "1.1",
            "schema": [
                {"forward": "CREATE TABLE audit (id INTEGER, entry TEXT)", "backward": "DROP TABLE audit"},
                {"forward": "CREATE INDEX audit_id ON audit (id)", "backward": "DROP INDEX audit_id"}
            ],
            "settings": [
                {"collection": "core", "entries": [
                    {"key": "theme", "new_value": "dark"},
                    {"key": "per_page", "new_value": 50, "override_existing": false}
                ]}
            ],
            "additions": [
                {"table": "actions", "key": ["audit", "view"], "value": {"level": "admin"}}
            ]
        }
    ]
}"#;

fn open(dir: &TempDir) -> (StateBackend, Upgrader) {
    let catalog_path = dir.path().join("catalog.json");
    fs::write(&catalog_path, CATALOG).unwrap();
    let (resolver, catalog) = CatalogDocument::from_json_file(&catalog_path)
        .unwrap()
        .into_parts()
        .unwrap();

    let backend = StateBackend::open(dir.path().join("state.json")).unwrap();
    let upgrader = Upgrader::new(
        StoreSet::from_backend(&backend, &DEFAULT_TABLES),
        resolver,
        catalog,
    )
    .unwrap()
    .with_config(UpgradeConfig::new().lease_holder("test-host"))
    .unwrap();
    (backend, upgrader)
}

#[test]
fn test_upgrade_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let (backend, upgrader) = open(&dir);
        backend.version_store().set_current(Some(&v("1.0"))).unwrap();
        let reports = upgrader.run_to_latest().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome == Outcome::Success));
    }

    let (backend, upgrader) = open(&dir);
    let state = backend.snapshot().unwrap();
    assert_eq!(state.version, Some(v("2.0")));
    assert!(state.schema.has_index("audit_id"));
    assert_eq!(state.settings["core"]["theme"], json!("dark"));
    assert_eq!(state.settings["core"]["per_page"], json!(50));
    assert_eq!(
        backend
            .keyed_store("actions")
            .get(&EntryKey::new(["audit", "view"]).unwrap())
            .unwrap(),
        Some(json!({"level": "admin"}))
    );
    assert!(state.leases.is_empty());
    assert!(state.flags.is_empty());
    assert!(upgrader.describe_versions().unwrap().is_up_to_date());
}

#[test]
fn test_rolled_back_upgrade_leaves_file_unchanged() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    {
        let (backend, _) = open(&dir);
        backend.version_store().set_current(Some(&v("1.0"))).unwrap();
        // the catalog's first statement will collide with this table
        backend
            .schema_executor()
            .execute("CREATE TABLE legacy (id INTEGER); CREATE INDEX audit_id ON legacy (id)")
            .unwrap();
    }
    let before = fs::read_to_string(&state_path).unwrap();

    let (backend, upgrader) = open(&dir);
    let report = upgrader.run_upgrade_report(&v("1.0")).unwrap();

    assert_eq!(report.outcome, Outcome::RolledBack);
    assert_eq!(report.failed_stage.as_deref(), Some("schema[1]"));
    assert_eq!(fs::read_to_string(&state_path).unwrap(), before);
    assert_eq!(backend.snapshot().unwrap().version, Some(v("1.0")));
}

#[test]
fn test_second_runner_cannot_open_state_in_use() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let (backend, upgrader) = open(&dir);
    backend.version_store().set_current(Some(&v("1.0"))).unwrap();

    let err = StateBackend::open(&state_path).err().unwrap();
    assert!(matches!(err, UpgradeError::LeaseUnavailable(_)));
    assert!(err.is_preflight());

    assert_eq!(upgrader.run_upgrade(&v("1.0")), Outcome::Success);
    drop(upgrader);
    drop(backend);

    // the next runner starts from the finished upgrade instead of overwriting it
    let (backend, upgrader) = open(&dir);
    assert_eq!(upgrader.describe_versions().unwrap().current, Some(v("1.1")));
    backend.flag_store().set_flag("other", true).unwrap();
    drop(upgrader);
    drop(backend);

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(raw["version"], json!("1.1"));
    assert_eq!(raw["settings"]["core"]["theme"], json!("dark"));
    assert_eq!(raw["flags"]["other"], json!(true));
}

#[test]
fn test_state_document_is_readable_json() {
    let dir = TempDir::new().unwrap();
    let (backend, _) = open(&dir);
    backend
        .keyed_store("routes")
        .set(&EntryKey::new(["blog", "post:view"]).unwrap(), json!("/p/:id"))
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("state.json")).unwrap()).unwrap();
    assert_eq!(raw["tables"]["routes"][0]["key"], json!(["blog", "post:view"]));
    assert_eq!(raw["tables"]["routes"][0]["value"], json!("/p/:id"));
}

#[test]
fn test_invalid_catalog_is_rejected() {
    let bad_edge = r#"{"versions": ["1.0", "2.0"], "changesets": [{"from": "1.0", "to": "1.5"}]}"#;
    let err = CatalogDocument::from_json_str(bad_edge)
        .unwrap()
        .into_parts()
        .unwrap_err();
    assert!(matches!(err, upgradekit::UpgradeError::InvalidChangeSet(_)));

    assert!(CatalogDocument::from_json_str(r#"{"versions": ["1.0", "not a version"]}"#).is_err());
    assert!(CatalogDocument::from_json_str(r#"{"versions": ["2.0", "1.0"]}"#)
        .unwrap()
        .into_parts()
        .is_err());
}
