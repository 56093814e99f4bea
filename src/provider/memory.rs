//! In-memory provider: the reference implementation of the provider
//! contract, used by tests and as a scratch backend.

use crate::error::ProviderError;
use crate::model::{Lexeme, ThoughtRecord};
use crate::provider::Provider;
use crate::types::{LexemeKey, ThoughtId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Provider over parking_lot-guarded maps.
///
/// Supports one-shot fault injection so push failure paths can be
/// exercised without a real backend.
#[derive(Default)]
pub struct MemoryProvider {
    thoughts: RwLock<HashMap<ThoughtId, ThoughtRecord>>,
    lexemes: RwLock<HashMap<LexemeKey, Lexeme>>,
    fail_next: RwLock<Option<String>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a thought directly, bypassing the update path
    pub fn seed_thought(&self, record: ThoughtRecord) {
        self.thoughts.write().insert(record.id.clone(), record);
    }

    /// Seed a lexeme directly, bypassing the update path
    pub fn seed_lexeme(&self, key: LexemeKey, lexeme: Lexeme) {
        self.lexemes.write().insert(key, lexeme);
    }

    /// Make the next `update_thoughts` call fail with `message`
    pub fn fail_next_update(&self, message: impl Into<String>) {
        *self.fail_next.write() = Some(message.into());
    }

    pub fn thought_count(&self) -> usize {
        self.thoughts.read().len()
    }

    pub fn lexeme_count(&self) -> usize {
        self.lexemes.read().len()
    }

    pub fn thought(&self, id: &str) -> Option<ThoughtRecord> {
        self.thoughts.read().get(id).cloned()
    }

    pub fn lexeme(&self, key: &LexemeKey) -> Option<Lexeme> {
        self.lexemes.read().get(key).cloned()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn get_thoughts_by_ids(
        &self,
        ids: &[ThoughtId],
    ) -> Result<Vec<Option<ThoughtRecord>>, ProviderError> {
        let thoughts = self.thoughts.read();
        Ok(ids.iter().map(|id| thoughts.get(id).cloned()).collect())
    }

    async fn get_lexemes_by_ids(
        &self,
        keys: &[LexemeKey],
    ) -> Result<Vec<Option<Lexeme>>, ProviderError> {
        let lexemes = self.lexemes.read();
        Ok(keys.iter().map(|key| lexemes.get(key).cloned()).collect())
    }

    async fn update_thoughts(
        &self,
        thought_updates: &HashMap<ThoughtId, Option<ThoughtRecord>>,
        lexeme_updates: &HashMap<LexemeKey, Option<Lexeme>>,
        _schema_version: u32,
    ) -> Result<(), ProviderError> {
        if let Some(message) = self.fail_next.write().take() {
            return Err(ProviderError::Unavailable(message));
        }

        let mut thoughts = self.thoughts.write();
        for (id, update) in thought_updates {
            match update {
                Some(record) => {
                    thoughts.insert(id.clone(), record.clone());
                }
                None => {
                    thoughts.remove(id);
                }
            }
        }

        let mut lexemes = self.lexemes.write();
        for (key, update) in lexeme_updates {
            match update {
                Some(lexeme) => {
                    lexemes.insert(key.clone(), lexeme.clone());
                }
                None => {
                    lexemes.remove(key);
                }
            }
        }

        Ok(())
    }

    async fn clear(&self) -> Result<(), ProviderError> {
        self.thoughts.write().clear();
        self.lexemes.write().clear();
        Ok(())
    }
}
