//! Whole-snapshot repair scenarios: several corruptions at once, full
//! load/repair/save cycles, and byte-level idempotence.

use grove::model::{ChildLink, Lexeme, ThoughtRecord};
use grove::repair::repair;
use grove::snapshot::{self, Database};
use grove::text::lexeme_key;
use grove::types::{ORPHANAGE_ID, ROOT_ID};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn record(id: &str, value: &str, parent: Option<&str>, rank: f64) -> ThoughtRecord {
    ThoughtRecord {
        id: id.to_string(),
        value: Some(value.to_string()),
        rank,
        parent_id: parent.map(|p| p.to_string()),
        children: BTreeMap::new(),
        last_updated: 1,
        updated_by: "test".to_string(),
        archived: None,
        pending: false,
    }
}

fn link(id: &str, value: &str, rank: f64) -> ChildLink {
    ChildLink {
        id: id.to_string(),
        value: value.to_string(),
        rank,
    }
}

/// A snapshot exercising several corruption classes at once:
/// - "lost" points at a parent that never existed (orphan)
/// - "ghost" is a null-valued pending placeholder
/// - "dup1"/"dup2" are duplicate siblings under "folder"
/// - "folder" links a child ("vanished") that has no row
/// - the lexeme for "note" holds a context of a deleted thought
fn corrupted_snapshot() -> Database {
    let mut db = Database::empty();

    let mut folder = record("folder", "folder", Some(ROOT_ID), 0.0);
    folder.children.insert("dup1".to_string(), link("dup1", "note", 0.0));
    folder.children.insert("dup2".to_string(), link("dup2", "note", 1.0));
    folder
        .children
        .insert("vanished".to_string(), link("vanished", "gone but linked", 2.0));

    let dup1 = record("dup1", "note", Some("folder"), 0.0);
    let dup2 = record("dup2", "note", Some("folder"), 1.0);
    let lost = record("lost", "lost note", Some("never-existed"), 0.0);
    let mut ghost = record("ghost", "", Some(ROOT_ID), 0.0);
    ghost.value = None;
    ghost.pending = true;

    for t in [folder, dup1, dup2, lost, ghost] {
        db.thought_index.insert(t.id.clone(), t);
    }

    let mut note_lex = Lexeme::for_thought("note", &"dup1".to_string(), "test");
    note_lex.contexts.insert("dup2".to_string());
    note_lex.contexts.insert("deleted-ages-ago".to_string());
    db.lexeme_index.insert(lexeme_key("note"), note_lex);

    db
}

#[test]
fn test_multi_fault_snapshot_fully_healed() {
    let mut db = corrupted_snapshot();
    let report = repair(&mut db).unwrap();

    assert_eq!(report.null_sentinels_dropped, 1);
    assert_eq!(report.num_orphans, 1);
    assert_eq!(report.missing_children_reconstructed, 1);
    assert_eq!(report.duplicate_siblings_merged, 1);
    assert!(report.dangling_contexts_pruned >= 1);
    assert!(!report.has_anomalies());

    // Structure after healing
    assert!(!db.thought_index.contains_key("ghost"));
    assert!(!db.thought_index.contains_key("dup2"));
    assert_eq!(
        db.thought_index["lost"].parent_id.as_deref(),
        Some(ORPHANAGE_ID)
    );
    assert_eq!(
        db.thought_index["vanished"].value.as_deref(),
        Some("gone but linked")
    );
    assert!(db.lexeme_index.contains_key(&lexeme_key("gone but linked")));
    let note = &db.lexeme_index[&lexeme_key("note")];
    assert!(note.contexts.contains("dup1"));
    assert!(!note.contexts.contains("dup2"));
    assert!(!note.contexts.contains("deleted-ages-ago"));
}

#[test]
fn test_repair_is_idempotent_byte_for_byte() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.json");

    let mut db = corrupted_snapshot();
    repair(&mut db).unwrap();
    snapshot::save(&path, &db).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    let mut reloaded = snapshot::load(&path).unwrap();
    let second_report = repair(&mut reloaded).unwrap();
    snapshot::save(&path, &reloaded).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();

    assert_eq!(second_report.total_changes(), 0);
    assert_eq!(first, second, "second repair must be a byte-level no-op");
}

#[test]
fn test_repair_report_serializes_camel_case() {
    let mut db = corrupted_snapshot();
    let report = repair(&mut db).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    for counter in [
        "nullSentinelsDropped",
        "numOrphans",
        "missingLexemesReconstructed",
        "missingChildrenReconstructed",
        "duplicateChildAttributionsStripped",
        "parentBacklinksRepaired",
        "duplicateSiblingsMerged",
        "unreachableThoughts",
        "danglingContextsPruned",
        "lexemeContextsMoved",
        "residualLemmaMismatches",
        "lexemeContextGapsFilled",
        "missingParentsAfterRepair",
    ] {
        assert!(json.get(counter).is_some(), "missing counter {}", counter);
    }
    assert_eq!(json["numOrphans"], 1);
}

#[test]
fn test_empty_snapshot_gains_roots_only() {
    let mut db = Database::empty();
    let report = repair(&mut db).unwrap();

    assert_eq!(db.thought_index.len(), 3);
    assert!(db.thought_index.contains_key(ROOT_ID));
    assert_eq!(report.total_changes(), 0);
    assert!(!db.thought_index.contains_key(ORPHANAGE_ID));
}

#[test]
fn test_repaired_snapshot_survives_save_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("db.json");

    let mut db = corrupted_snapshot();
    repair(&mut db).unwrap();
    snapshot::save(&path, &db).unwrap();

    let loaded = snapshot::load(&path).unwrap();
    assert_eq!(loaded, db);
}
