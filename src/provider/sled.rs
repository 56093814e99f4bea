//! Sled-backed local provider: the on-disk cache implementation of the
//! provider contract, storing bincode values in a single sled tree.

use crate::error::ProviderError;
use crate::model::{Lexeme, ThoughtRecord};
use crate::provider::Provider;
use crate::types::{LexemeKey, ThoughtId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const THOUGHT_PREFIX: &str = "thought:";
const LEXEME_PREFIX: &str = "lexeme:";
const SCHEMA_KEY: &str = "meta:schemaVersion";

/// Local disk cache over sled + bincode
pub struct SledProvider {
    db: sled::Db,
}

impl SledProvider {
    /// Open (or create) the database at `path`, verifying the stored
    /// schema version against `schema_version`. A fresh database records
    /// the version; an existing one with a different version is refused —
    /// run the migration pipeline first.
    pub fn open<P: AsRef<Path>>(path: P, schema_version: u32) -> Result<Self, ProviderError> {
        let db = sled::open(path)
            .map_err(|e| ProviderError::Storage(format!("failed to open sled database: {}", e)))?;

        match db
            .get(SCHEMA_KEY)
            .map_err(|e| ProviderError::Storage(format!("failed to read schema version: {}", e)))?
        {
            Some(bytes) => {
                let found: u32 = bincode::deserialize(&bytes).map_err(|e| {
                    ProviderError::Serialization(format!(
                        "failed to deserialize schema version: {}",
                        e
                    ))
                })?;
                if found != schema_version {
                    return Err(ProviderError::SchemaMismatch {
                        found,
                        expected: schema_version,
                    });
                }
            }
            None => {
                let bytes = bincode::serialize(&schema_version).map_err(|e| {
                    ProviderError::Serialization(format!(
                        "failed to serialize schema version: {}",
                        e
                    ))
                })?;
                db.insert(SCHEMA_KEY, bytes).map_err(|e| {
                    ProviderError::Storage(format!("failed to record schema version: {}", e))
                })?;
            }
        }

        Ok(Self { db })
    }

    fn thought_key(id: &str) -> Vec<u8> {
        format!("{}{}", THOUGHT_PREFIX, id).into_bytes()
    }

    fn lexeme_key_bytes(key: &LexemeKey) -> Vec<u8> {
        format!("{}{}", LEXEME_PREFIX, key).into_bytes()
    }

    fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        key: &[u8],
    ) -> Result<Option<T>, ProviderError> {
        match self
            .db
            .get(key)
            .map_err(|e| ProviderError::Storage(format!("failed to read value: {}", e)))?
        {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes).map_err(|e| {
                    ProviderError::Serialization(format!("failed to deserialize value: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Provider for SledProvider {
    async fn get_thoughts_by_ids(
        &self,
        ids: &[ThoughtId],
    ) -> Result<Vec<Option<ThoughtRecord>>, ProviderError> {
        ids.iter()
            .map(|id| self.get_value(&Self::thought_key(id)))
            .collect()
    }

    async fn get_lexemes_by_ids(
        &self,
        keys: &[LexemeKey],
    ) -> Result<Vec<Option<Lexeme>>, ProviderError> {
        keys.iter()
            .map(|key| self.get_value(&Self::lexeme_key_bytes(key)))
            .collect()
    }

    async fn update_thoughts(
        &self,
        thought_updates: &HashMap<ThoughtId, Option<ThoughtRecord>>,
        lexeme_updates: &HashMap<LexemeKey, Option<Lexeme>>,
        _schema_version: u32,
    ) -> Result<(), ProviderError> {
        let mut batch = sled::Batch::default();

        for (id, update) in thought_updates {
            match update {
                Some(record) => {
                    let bytes = bincode::serialize(record).map_err(|e| {
                        ProviderError::Serialization(format!(
                            "failed to serialize thought {}: {}",
                            id, e
                        ))
                    })?;
                    batch.insert(Self::thought_key(id), bytes);
                }
                None => batch.remove(Self::thought_key(id)),
            }
        }

        for (key, update) in lexeme_updates {
            match update {
                Some(lexeme) => {
                    let bytes = bincode::serialize(lexeme).map_err(|e| {
                        ProviderError::Serialization(format!(
                            "failed to serialize lexeme {}: {}",
                            key, e
                        ))
                    })?;
                    batch.insert(Self::lexeme_key_bytes(key), bytes);
                }
                None => batch.remove(Self::lexeme_key_bytes(key)),
            }
        }

        self.db
            .apply_batch(batch)
            .map_err(|e| ProviderError::Storage(format!("failed to apply batch: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| ProviderError::Storage(format!("failed to flush database: {}", e)))?;

        debug!(
            thoughts = thought_updates.len(),
            lexemes = lexeme_updates.len(),
            "persisted batch to local cache"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<(), ProviderError> {
        self.db
            .clear()
            .map_err(|e| ProviderError::Storage(format!("failed to clear database: {}", e)))?;
        Ok(())
    }
}
