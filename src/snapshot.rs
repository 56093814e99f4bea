//! Whole-database snapshot: the JSON shape consumed by the migration
//! pipeline and the repair engine, plus file I/O for the CLI.

use crate::error::SnapshotError;
use crate::migrate::{self, SCHEMA_LATEST};
use crate::model::{Lexeme, ThoughtRecord};
use crate::types::{LexemeKey, ThoughtId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// A whole database at the current schema version.
///
/// Ordered maps keep serialization deterministic, which is what makes
/// repair idempotence checkable byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub schema_version: u32,
    #[serde(default)]
    pub thought_index: BTreeMap<ThoughtId, ThoughtRecord>,
    #[serde(default)]
    pub lexeme_index: BTreeMap<LexemeKey, Lexeme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Timestamp>,
}

impl Database {
    pub fn empty() -> Self {
        Database {
            schema_version: SCHEMA_LATEST,
            thought_index: BTreeMap::new(),
            lexeme_index: BTreeMap::new(),
            email: None,
            last_client_id: None,
            last_updated: None,
        }
    }
}

/// Read a snapshot file and migrate it to the current schema version
pub fn load(path: &Path) -> Result<Database, SnapshotError> {
    let raw = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let db = migrate::parse_and_migrate(value)?;
    info!(path = %path.display(), thoughts = db.thought_index.len(), "loaded snapshot");
    Ok(db)
}

/// Write a snapshot atomically: temp file in the same directory, then
/// rename over the target.
pub fn save(path: &Path, db: &Database) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(db)?;
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, json)?;
    fs::rename(&temp_path, path)?;
    info!(path = %path.display(), "wrote snapshot");
    Ok(())
}
