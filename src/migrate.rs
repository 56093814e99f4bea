//! Schema migration pipeline: stepwise, versioned transforms of a
//! whole-database snapshot up to the current schema version.
//!
//! Each past schema version is a distinct tagged variant in a closed
//! chain; the driver matches on the current variant and only ever
//! produces the next one. Transitions are pure, applied strictly in
//! order, and never skipped — later transitions depend on shapes the
//! earlier ones produce.

use crate::error::MigrateError;
use crate::model::{ChildLink, Lexeme, ThoughtRecord};
use crate::snapshot::Database;
use crate::text::{lexeme_key, normalize};
use crate::types::{ClientId, LexemeKey, ThoughtId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

/// The current schema version; terminal state of the pipeline
pub const SCHEMA_LATEST: u32 = 4;

// ---- v1: thoughts carry an inlined children array ----------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInlineV1 {
    /// Early clients sometimes wrote links without ids; such entries
    /// cannot be keyed and are dropped during migration
    #[serde(default)]
    pub id: Option<ThoughtId>,
    pub value: String,
    #[serde(default)]
    pub rank: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtV1 {
    pub id: ThoughtId,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub rank: f64,
    #[serde(default)]
    pub parent_id: Option<ThoughtId>,
    #[serde(default)]
    pub children: Vec<ChildInlineV1>,
    #[serde(default)]
    pub last_updated: Timestamp,
    #[serde(default)]
    pub updated_by: ClientId,
    #[serde(default)]
    pub archived: Option<Timestamp>,
    #[serde(default)]
    pub pending: bool,
}

// ---- v1/v2: lexemes carry `value` and a memberOf array -----------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextV2 {
    pub context: ThoughtId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexemeV2 {
    pub value: String,
    #[serde(default)]
    pub member_of: Vec<ContextV2>,
    #[serde(default)]
    pub created: Timestamp,
    #[serde(default)]
    pub last_updated: Timestamp,
    #[serde(default)]
    pub updated_by: ClientId,
}

// ---- v3: renamed lexeme fields; raw text retained for the v4 rehash ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexemeV3 {
    pub value: String,
    pub lemma: String,
    #[serde(default)]
    pub contexts: BTreeSet<ThoughtId>,
    #[serde(default)]
    pub created: Timestamp,
    #[serde(default)]
    pub last_updated: Timestamp,
    #[serde(default)]
    pub updated_by: ClientId,
}

macro_rules! database_shape {
    ($name:ident, $thought:ty, $lexeme:ty) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub schema_version: u32,
            #[serde(default)]
            pub thought_index: BTreeMap<ThoughtId, $thought>,
            #[serde(default)]
            pub lexeme_index: BTreeMap<LexemeKey, $lexeme>,
            #[serde(default)]
            pub email: Option<String>,
            #[serde(default)]
            pub last_client_id: Option<String>,
            #[serde(default)]
            pub last_updated: Option<Timestamp>,
        }
    };
}

database_shape!(DatabaseV1, ThoughtV1, LexemeV2);
database_shape!(DatabaseV2, ThoughtRecord, LexemeV2);
database_shape!(DatabaseV3, ThoughtRecord, LexemeV3);

/// A snapshot at any known schema version
#[derive(Debug, Clone)]
pub enum VersionedDatabase {
    V1(DatabaseV1),
    V2(DatabaseV2),
    V3(DatabaseV3),
    V4(Database),
}

impl VersionedDatabase {
    pub fn version(&self) -> u32 {
        match self {
            VersionedDatabase::V1(_) => 1,
            VersionedDatabase::V2(_) => 2,
            VersionedDatabase::V3(_) => 3,
            VersionedDatabase::V4(_) => 4,
        }
    }

    /// Parse raw snapshot JSON into its tagged version variant.
    ///
    /// Fatal, surfaced to the operator: a missing version field, a
    /// version newer than this code knows, or a version with no
    /// registered transition.
    pub fn parse(value: serde_json::Value) -> Result<Self, MigrateError> {
        let version = value
            .get("schemaVersion")
            .and_then(|v| v.as_u64())
            .ok_or(MigrateError::MissingVersion)? as u32;

        let parse_err = |e: serde_json::Error| MigrateError::Parse {
            version,
            message: e.to_string(),
        };

        match version {
            1 => Ok(VersionedDatabase::V1(
                serde_json::from_value(value).map_err(parse_err)?,
            )),
            2 => Ok(VersionedDatabase::V2(
                serde_json::from_value(value).map_err(parse_err)?,
            )),
            3 => Ok(VersionedDatabase::V3(
                serde_json::from_value(value).map_err(parse_err)?,
            )),
            4 => Ok(VersionedDatabase::V4(
                serde_json::from_value(value).map_err(parse_err)?,
            )),
            v if v > SCHEMA_LATEST => Err(MigrateError::VersionTooNew(v, SCHEMA_LATEST)),
            v => Err(MigrateError::NoTransition(v)),
        }
    }
}

/// Drive a snapshot to the current schema version, one transition at a
/// time. A snapshot already at the latest version passes through
/// unchanged.
#[instrument(skip(db), fields(from = db.version()))]
pub fn migrate(mut db: VersionedDatabase) -> Result<Database, MigrateError> {
    loop {
        db = match db {
            VersionedDatabase::V4(done) => return Ok(done),
            other => {
                let from = other.version();
                let next = step(other);
                info!(from, to = from + 1, "applied schema migration");
                next
            }
        };
    }
}

/// Parse raw JSON and migrate in one call
pub fn parse_and_migrate(value: serde_json::Value) -> Result<Database, MigrateError> {
    migrate(VersionedDatabase::parse(value)?)
}

fn step(db: VersionedDatabase) -> VersionedDatabase {
    match db {
        VersionedDatabase::V1(v1) => VersionedDatabase::V2(migrate_v1_to_v2(v1)),
        VersionedDatabase::V2(v2) => VersionedDatabase::V3(migrate_v2_to_v3(v2)),
        VersionedDatabase::V3(v3) => VersionedDatabase::V4(migrate_v3_to_v4(v3)),
        VersionedDatabase::V4(v4) => VersionedDatabase::V4(v4),
    }
}

/// v1 → v2: inlined-children array becomes an id-keyed children map.
///
/// Reconstructed only from the thought's own children list; entries with
/// no id cannot be keyed and are dropped rather than invented.
fn migrate_v1_to_v2(v1: DatabaseV1) -> DatabaseV2 {
    let thought_index = v1
        .thought_index
        .into_iter()
        .map(|(id, t)| {
            let mut children = BTreeMap::new();
            for link in t.children {
                match link.id {
                    Some(child_id) => {
                        children.insert(
                            child_id.clone(),
                            ChildLink {
                                id: child_id,
                                value: link.value,
                                rank: link.rank,
                            },
                        );
                    }
                    None => {
                        warn!(parent = %id, value = %link.value, "dropping id-less child link");
                    }
                }
            }
            (
                id,
                ThoughtRecord {
                    id: t.id,
                    value: t.value,
                    rank: t.rank,
                    parent_id: t.parent_id,
                    children,
                    last_updated: t.last_updated,
                    updated_by: t.updated_by,
                    archived: t.archived,
                    pending: t.pending,
                },
            )
        })
        .collect();

    DatabaseV2 {
        schema_version: 2,
        thought_index,
        lexeme_index: v1.lexeme_index,
        email: v1.email,
        last_client_id: v1.last_client_id,
        last_updated: v1.last_updated,
    }
}

/// v2 → v3: lexeme `memberOf` array becomes a `contexts` set and the
/// lemma is derived from the recorded text.
fn migrate_v2_to_v3(v2: DatabaseV2) -> DatabaseV3 {
    let lexeme_index = v2
        .lexeme_index
        .into_iter()
        .map(|(key, lex)| {
            let contexts: BTreeSet<ThoughtId> =
                lex.member_of.into_iter().map(|c| c.context).collect();
            (
                key,
                LexemeV3 {
                    lemma: normalize(&lex.value),
                    value: lex.value,
                    contexts,
                    created: lex.created,
                    last_updated: lex.last_updated,
                    updated_by: lex.updated_by,
                },
            )
        })
        .collect();

    DatabaseV3 {
        schema_version: 3,
        thought_index: v2.thought_index,
        lexeme_index,
        email: v2.email,
        last_client_id: v2.last_client_id,
        last_updated: v2.last_updated,
    }
}

/// v3 → v4: global rehash of lexeme storage keys with the current hash
/// function. Any lexeme whose old key no longer matches the live hash of
/// its recorded text is re-keyed; colliding entries merge contexts.
fn migrate_v3_to_v4(v3: DatabaseV3) -> Database {
    let mut lexeme_index: BTreeMap<LexemeKey, Lexeme> = BTreeMap::new();
    let mut rekeyed = 0usize;

    for (old_key, lex) in v3.lexeme_index {
        let live_key = lexeme_key(&lex.value);
        if live_key != old_key {
            rekeyed += 1;
        }
        let incoming = Lexeme {
            lemma: lex.lemma,
            contexts: lex.contexts,
            created: lex.created,
            last_updated: lex.last_updated,
            updated_by: lex.updated_by,
        };
        match lexeme_index.remove(&live_key) {
            Some(existing) => {
                lexeme_index.insert(live_key, Lexeme::merge(&existing, &incoming));
            }
            None => {
                lexeme_index.insert(live_key, incoming);
            }
        }
    }

    if rekeyed > 0 {
        info!(rekeyed, "re-keyed lexemes during v3 -> v4 rehash");
    }

    Database {
        schema_version: SCHEMA_LATEST,
        thought_index: v3.thought_index,
        lexeme_index,
        email: v3.email,
        last_client_id: v3.last_client_id,
        last_updated: v3.last_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_snapshot() -> serde_json::Value {
        json!({
            "schemaVersion": 1,
            "thoughtIndex": {
                "a": {
                    "id": "a",
                    "value": "alpha",
                    "rank": 0.0,
                    "parentId": "__ROOT__",
                    "children": [
                        { "id": "b", "value": "beta", "rank": 1.0 },
                        { "value": "idless", "rank": 2.0 }
                    ],
                    "lastUpdated": 10,
                    "updatedBy": "dev"
                }
            },
            "lexemeIndex": {
                "deadbeef": {
                    "value": "alpha",
                    "memberOf": [ { "context": "a" }, { "context": "gone" } ],
                    "created": 1,
                    "lastUpdated": 2,
                    "updatedBy": "dev"
                }
            }
        })
    }

    #[test]
    fn test_migrates_v1_to_latest() {
        let db = parse_and_migrate(v1_snapshot()).unwrap();
        assert_eq!(db.schema_version, SCHEMA_LATEST);

        let a = &db.thought_index["a"];
        // Children map keyed by id; id-less entry dropped, not invented
        assert_eq!(a.children.len(), 1);
        assert_eq!(a.children["b"].value, "beta");

        // Lexeme re-keyed by the live hash of its recorded text
        let live = &db.lexeme_index[&lexeme_key("alpha")];
        assert_eq!(live.lemma, "alpha");
        assert!(live.contexts.contains("a"));
        assert!(!db.lexeme_index.contains_key(&LexemeKey("deadbeef".to_string())));
    }

    #[test]
    fn test_latest_is_noop() {
        let db = Database {
            schema_version: SCHEMA_LATEST,
            ..crate::snapshot::Database::empty()
        };
        let json = serde_json::to_value(&db).unwrap();
        let migrated = parse_and_migrate(json).unwrap();
        assert_eq!(migrated, db);
    }

    #[test]
    fn test_missing_version_fatal() {
        let result = VersionedDatabase::parse(json!({ "thoughtIndex": {} }));
        assert!(matches!(result, Err(MigrateError::MissingVersion)));
    }

    #[test]
    fn test_newer_version_fatal() {
        let result = VersionedDatabase::parse(json!({ "schemaVersion": 99 }));
        assert!(matches!(result, Err(MigrateError::VersionTooNew(99, SCHEMA_LATEST))));
    }

    #[test]
    fn test_unregistered_version_fatal() {
        let result = VersionedDatabase::parse(json!({ "schemaVersion": 0 }));
        assert!(matches!(result, Err(MigrateError::NoTransition(0))));
    }

    #[test]
    fn test_rehash_merges_collisions() {
        // Two stale keys whose recorded text is identical collapse into
        // one live entry with unioned contexts.
        let json = json!({
            "schemaVersion": 3,
            "thoughtIndex": {},
            "lexemeIndex": {
                "oldkey1": {
                    "value": "same text", "lemma": "same text",
                    "contexts": ["t1"], "created": 1, "lastUpdated": 1, "updatedBy": "x"
                },
                "oldkey2": {
                    "value": "same text", "lemma": "same text",
                    "contexts": ["t2"], "created": 2, "lastUpdated": 2, "updatedBy": "y"
                }
            }
        });
        let db = parse_and_migrate(json).unwrap();
        assert_eq!(db.lexeme_index.len(), 1);
        let merged = &db.lexeme_index[&lexeme_key("same text")];
        assert!(merged.contexts.contains("t1"));
        assert!(merged.contexts.contains("t2"));
    }
}
