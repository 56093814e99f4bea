//! Migration pipeline driven through the snapshot file surface, the way
//! the CLI exercises it: raw JSON on disk in an old schema, loaded and
//! stepped to the current version.

use grove::error::{MigrateError, SnapshotError};
use grove::migrate::SCHEMA_LATEST;
use grove::repair::repair;
use grove::snapshot;
use grove::text::lexeme_key;
use grove::types::ROOT_ID;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write_snapshot(dir: &TempDir, value: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join("db.json");
    fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    path
}

#[test]
fn test_v1_file_loads_at_latest_schema() {
    let temp = TempDir::new().unwrap();
    let path = write_snapshot(
        &temp,
        json!({
            "schemaVersion": 1,
            "thoughtIndex": {
                "a": {
                    "id": "a",
                    "value": "groceries",
                    "rank": 0.0,
                    "parentId": ROOT_ID,
                    "children": [
                        { "id": "b", "value": "milk", "rank": 0.0 },
                        { "value": "no id, dropped", "rank": 1.0 }
                    ],
                    "lastUpdated": 10,
                    "updatedBy": "phone"
                },
                "b": {
                    "id": "b",
                    "value": "milk",
                    "rank": 0.0,
                    "parentId": "a",
                    "children": [],
                    "lastUpdated": 11,
                    "updatedBy": "phone"
                }
            },
            "lexemeIndex": {
                "stale-hash-1": {
                    "value": "groceries",
                    "memberOf": [ { "context": "a" } ],
                    "created": 1, "lastUpdated": 2, "updatedBy": "phone"
                },
                "stale-hash-2": {
                    "value": "milk",
                    "memberOf": [ { "context": "b" } ],
                    "created": 3, "lastUpdated": 4, "updatedBy": "phone"
                }
            },
            "email": "user@example.com"
        }),
    );

    let db = snapshot::load(&path).unwrap();
    assert_eq!(db.schema_version, SCHEMA_LATEST);
    assert_eq!(db.email.as_deref(), Some("user@example.com"));

    // v1 -> v2: children array became an id-keyed map, id-less link dropped
    let a = &db.thought_index["a"];
    assert_eq!(a.children.len(), 1);
    assert_eq!(a.children["b"].value, "milk");

    // v2 -> v3 -> v4: memberOf became contexts, lemma derived, keys rehashed
    let groceries = &db.lexeme_index[&lexeme_key("groceries")];
    assert_eq!(groceries.lemma, "groceries");
    assert!(groceries.contexts.contains("a"));
    assert!(!db
        .lexeme_index
        .contains_key(&grove::types::LexemeKey("stale-hash-1".to_string())));
}

#[test]
fn test_migrated_snapshot_saves_at_latest_version() {
    let temp = TempDir::new().unwrap();
    let path = write_snapshot(
        &temp,
        json!({ "schemaVersion": 2, "thoughtIndex": {}, "lexemeIndex": {} }),
    );

    let db = snapshot::load(&path).unwrap();
    snapshot::save(&path, &db).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["schemaVersion"], SCHEMA_LATEST);
}

#[test]
fn test_future_schema_version_refused() {
    let temp = TempDir::new().unwrap();
    let path = write_snapshot(&temp, json!({ "schemaVersion": 99 }));

    match snapshot::load(&path) {
        Err(SnapshotError::Migrate(MigrateError::VersionTooNew(found, latest))) => {
            assert_eq!(found, 99);
            assert_eq!(latest, SCHEMA_LATEST);
        }
        other => panic!("expected version-too-new, got {:?}", other.is_ok()),
    }
}

#[test]
fn test_missing_version_field_refused() {
    let temp = TempDir::new().unwrap();
    let path = write_snapshot(&temp, json!({ "thoughtIndex": {} }));

    assert!(matches!(
        snapshot::load(&path),
        Err(SnapshotError::Migrate(MigrateError::MissingVersion))
    ));
}

#[test]
fn test_migrate_then_repair_end_to_end() {
    // The operator path: an old snapshot with corruption is migrated and
    // repaired in one pass.
    let temp = TempDir::new().unwrap();
    let path = write_snapshot(
        &temp,
        json!({
            "schemaVersion": 1,
            "thoughtIndex": {
                "orphan": {
                    "id": "orphan",
                    "value": "adrift",
                    "rank": 0.0,
                    "parentId": "long-gone",
                    "children": [],
                    "lastUpdated": 5,
                    "updatedBy": "laptop"
                }
            },
            "lexemeIndex": {}
        }),
    );

    let mut db = snapshot::load(&path).unwrap();
    let report = repair(&mut db).unwrap();

    assert_eq!(report.num_orphans, 1);
    assert_eq!(report.missing_lexemes_reconstructed, 1);
    assert!(db.lexeme_index[&lexeme_key("adrift")].contexts.contains("orphan"));
}
