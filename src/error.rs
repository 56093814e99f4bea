//! Error types for the thought/lexeme store and its engines.

use crate::types::{LexemeKey, ThoughtId};
use thiserror::Error;

/// Provider (persistence backend) errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider storage error: {0}")]
    Storage(String),

    #[error("Provider serialization error: {0}")]
    Serialization(String),

    #[error("Schema version mismatch: store holds v{found}, expected v{expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

/// In-memory tree store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Thought not found: {0}")]
    ThoughtNotFound(ThoughtId),

    #[error("Lexeme not found: {0}")]
    LexemeNotFound(LexemeKey),

    #[error("Cannot reparent a root thought: {0}")]
    CannotMoveRoot(ThoughtId),

    #[error("Cannot delete a root thought: {0}")]
    CannotDeleteRoot(ThoughtId),

    #[error("Move would create a cycle: {descendant} is a descendant of {ancestor}")]
    MoveIntoDescendant {
        ancestor: ThoughtId,
        descendant: ThoughtId,
    },
}

/// Ancestor-chain resolution errors
#[derive(Debug, Error)]
pub enum PathError {
    #[error("Cycle detected while resolving ancestors: {}", format_cycle(.0))]
    CycleDetected(Vec<ThoughtId>),

    #[error("Ancestor {missing} of {of} is not loaded")]
    AncestorMissing { of: ThoughtId, missing: ThoughtId },
}

fn format_cycle(cycle: &[ThoughtId]) -> String {
    cycle.join(" -> ")
}

/// Push engine errors
#[derive(Debug, Error)]
pub enum PushError {
    /// Persist failure; carries the batch that failed so callers can
    /// diagnose or retry at their layer. At-most-once: the engine does
    /// not re-queue it.
    #[error("Persist failed ({target}): {source}")]
    PersistFailed {
        target: &'static str,
        source: ProviderError,
        batch: Box<crate::push::Batch>,
    },
}

/// Migration pipeline errors
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Snapshot has no schemaVersion field")]
    MissingVersion,

    #[error("Snapshot schema v{0} is newer than the latest supported v{1}; upgrade this tool")]
    VersionTooNew(u32, u32),

    #[error("No migration registered for schema v{0}")]
    NoTransition(u32),

    #[error("Snapshot parse error at schema v{version}: {message}")]
    Parse { version: u32, message: String },
}

/// Repair engine errors
#[derive(Debug, Error)]
pub enum RepairError {
    /// A thought with no value outside the recognized placeholder case.
    /// Never auto-healed; requires manual inspection.
    #[error("Thought {0} has no value and is not a pending placeholder")]
    UndefinedValue(ThoughtId),
}

/// Snapshot file I/O errors (CLI surface)
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Migrate(#[from] MigrateError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}
