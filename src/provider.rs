//! Provider contract: the narrow async interface every persistence
//! backend implements, consumed identically by the pull and push
//! engines.
//!
//! Lookups are positional: the result vector has the same length and
//! order as the request, with `None` marking "not found" — callers can
//! distinguish not-found from not-requested. The core assumes nothing
//! about the transport behind an implementation.

use crate::error::ProviderError;
use crate::model::{Lexeme, ThoughtRecord};
use crate::types::{LexemeKey, ThoughtId};
use async_trait::async_trait;
use std::collections::HashMap;

pub mod memory;
pub mod sled;

pub use self::sled::SledProvider;
pub use memory::MemoryProvider;

/// Persistence backend contract (local disk cache, remote replica, ...)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetch thoughts by id; positional, same length as `ids`
    async fn get_thoughts_by_ids(
        &self,
        ids: &[ThoughtId],
    ) -> Result<Vec<Option<ThoughtRecord>>, ProviderError>;

    /// Fetch lexemes by storage key; positional, same length as `keys`
    async fn get_lexemes_by_ids(
        &self,
        keys: &[LexemeKey],
    ) -> Result<Vec<Option<Lexeme>>, ProviderError>;

    /// Apply a batch of updates; a `None` value deletes the entry
    async fn update_thoughts(
        &self,
        thought_updates: &HashMap<ThoughtId, Option<ThoughtRecord>>,
        lexeme_updates: &HashMap<LexemeKey, Option<Lexeme>>,
        schema_version: u32,
    ) -> Result<(), ProviderError>;

    /// Drop all stored data
    async fn clear(&self) -> Result<(), ProviderError>;
}
