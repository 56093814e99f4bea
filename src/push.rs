//! Push engine: collects local mutations into batches, merges
//! concurrently-produced batches, and persists them to the configured
//! providers.
//!
//! The debounce window is the only scheduling primitive; batch merges
//! are pure data merges, so no locks beyond the queue mutex are needed.
//! Delivery is at-most-once: the queue is cleared before the async
//! persist begins, and a failed batch is surfaced to the caller rather
//! than re-queued.

use crate::error::{ProviderError, PushError};
use crate::model::{Lexeme, Thought, ThoughtRecord};
use crate::provider::Provider;
use crate::store::TreeStore;
use crate::text::normalize;
use crate::types::{LexemeKey, ThoughtId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// A coalesced set of pending thought/lexeme mutations awaiting
/// persistence. A `None` value for a key means delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub thought_updates: HashMap<ThoughtId, Option<Thought>>,
    pub lexeme_updates: HashMap<LexemeKey, Option<Lexeme>>,
    /// Persist to the local provider
    pub local: bool,
    /// Persist to the remote provider
    pub remote: bool,
    /// Ids touched by the originating edit, for recency tracking
    pub recently_edited: BTreeSet<ThoughtId>,
    /// Lexeme keys never pulled locally; their stored copy must be
    /// reconciled before writing (see [`PushEngine::flush`])
    pub pending_lexemes: BTreeSet<LexemeKey>,
}

impl Batch {
    pub fn local_and_remote() -> Self {
        Batch {
            local: true,
            remote: true,
            ..Default::default()
        }
    }

    pub fn local_only() -> Self {
        Batch {
            local: true,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thought_updates.is_empty() && self.lexeme_updates.is_empty()
    }

    /// Merge `later` over `self`: last-write-wins per key, persistence
    /// flags OR-reduced forward. Associative.
    pub fn merge(mut self, later: Batch) -> Batch {
        self.thought_updates.extend(later.thought_updates);
        self.lexeme_updates.extend(later.lexeme_updates);
        self.local |= later.local;
        self.remote |= later.remote;
        self.recently_edited.extend(later.recently_edited);
        self.pending_lexemes.extend(later.pending_lexemes);
        self
    }
}

/// Merge a sequence of batches oldest-first
pub fn merge_batches(batches: impl IntoIterator<Item = Batch>) -> Batch {
    batches
        .into_iter()
        .fold(Batch::default(), |acc, b| acc.merge(b))
}

/// Batching, merging, and dispatch of mutations to providers.
pub struct PushEngine {
    local: Option<Arc<dyn Provider>>,
    remote: Option<Arc<dyn Provider>>,
    queue: Mutex<Option<Batch>>,
    debounce: Duration,
    schema_version: u32,
}

impl PushEngine {
    pub fn new(
        local: Option<Arc<dyn Provider>>,
        remote: Option<Arc<dyn Provider>>,
        debounce: Duration,
        schema_version: u32,
    ) -> Self {
        PushEngine {
            local,
            remote,
            queue: Mutex::new(None),
            debounce,
            schema_version,
        }
    }

    /// Coalesce a batch into the outstanding window
    pub fn enqueue(&self, batch: Batch) {
        let mut queue = self.queue.lock();
        *queue = Some(match queue.take() {
            Some(existing) => existing.merge(batch),
            None => batch,
        });
    }

    /// Whether an unflushed batch is outstanding
    pub fn has_pending(&self) -> bool {
        self.queue.lock().is_some()
    }

    /// Wait out the debounce window, then flush. Rapid successive edits
    /// enqueued during the wait are coalesced into the same flush.
    pub async fn flush_after_debounce(
        &self,
        store: &TreeStore,
    ) -> Result<Option<Batch>, PushError> {
        tokio::time::sleep(self.debounce).await;
        self.flush(store).await
    }

    /// Flush the outstanding batch to the configured providers.
    ///
    /// The queue is cleared before the persist begins, so an edit
    /// arriving mid-flush lands in a fresh window instead of being sent
    /// twice. Returns the flushed batch, or `None` when nothing was
    /// outstanding.
    #[instrument(skip(self, store))]
    pub async fn flush(&self, store: &TreeStore) -> Result<Option<Batch>, PushError> {
        let Some(mut batch) = self.queue.lock().take() else {
            return Ok(None);
        };
        if batch.is_empty() {
            return Ok(None);
        }

        self.attach_parents(store, &mut batch);
        self.resolve_lexeme_conflicts(store, &mut batch).await;

        let flushed = batch.clone();
        debug!(
            thoughts = batch.thought_updates.len(),
            lexemes = batch.lexeme_updates.len(),
            local = batch.local,
            remote = batch.remote,
            "flushing batch"
        );

        let lexeme_updates = batch.lexeme_updates.clone();

        // Local persistence never writes pending placeholders
        let local_thoughts: HashMap<ThoughtId, Option<ThoughtRecord>> = batch
            .thought_updates
            .iter()
            .filter(|(_, update)| !matches!(update, Some(t) if t.pending))
            .map(|(id, update)| (id.clone(), update.as_ref().map(ThoughtRecord::from)))
            .collect();
        let remote_thoughts: HashMap<ThoughtId, Option<ThoughtRecord>> = batch
            .thought_updates
            .iter()
            .map(|(id, update)| (id.clone(), update.as_ref().map(ThoughtRecord::from)))
            .collect();

        let local_fut = async {
            if !batch.local {
                return Ok(());
            }
            match &self.local {
                Some(provider) => {
                    provider
                        .update_thoughts(&local_thoughts, &lexeme_updates, self.schema_version)
                        .await
                }
                None => Ok(()),
            }
        };
        let remote_fut = async {
            if !batch.remote {
                return Ok(());
            }
            match &self.remote {
                Some(provider) => {
                    provider
                        .update_thoughts(&remote_thoughts, &lexeme_updates, self.schema_version)
                        .await
                }
                None => Ok(()),
            }
        };

        let (local_result, remote_result): (
            Result<(), ProviderError>,
            Result<(), ProviderError>,
        ) = futures::join!(local_fut, remote_fut);

        if let Err(source) = local_result {
            return Err(PushError::PersistFailed {
                target: "local",
                source,
                batch: Box::new(flushed),
            });
        }
        if let Err(source) = remote_result {
            return Err(PushError::PersistFailed {
                target: "remote",
                source,
                batch: Box::new(flushed),
            });
        }

        Ok(Some(flushed))
    }

    /// When a thought update affects parent→child linkage, persist the
    /// parent too so its inline children snapshot stays consistent on
    /// the backend.
    fn attach_parents(&self, store: &TreeStore, batch: &mut Batch) {
        let mut attach: Vec<Thought> = Vec::new();
        for update in batch.thought_updates.values().flatten() {
            let Some(parent_id) = &update.parent_id else {
                continue;
            };
            if batch.thought_updates.contains_key(parent_id) {
                continue;
            }
            if let Some(parent) = store.thought(parent_id) {
                attach.push(parent.clone());
            }
        }
        for parent in attach {
            batch
                .thought_updates
                .insert(parent.id.clone(), Some(parent));
        }
    }

    /// Reconcile never-pulled lexeme keys against the currently stored
    /// copy: union context ids, filtering out stale references — contexts
    /// whose owning thought's normalized value no longer equals the lemma,
    /// or whose thought this very batch deletes. Plain union would
    /// resurrect deleted or relocated contexts.
    async fn resolve_lexeme_conflicts(&self, store: &TreeStore, batch: &mut Batch) {
        if batch.pending_lexemes.is_empty() {
            return;
        }
        let keys: Vec<LexemeKey> = batch
            .pending_lexemes
            .iter()
            .filter(|key| matches!(batch.lexeme_updates.get(*key), Some(Some(_))))
            .cloned()
            .collect();
        if keys.is_empty() {
            return;
        }

        let provider = match (&self.remote, &self.local) {
            (Some(remote), _) if batch.remote => remote,
            (_, Some(local)) => local,
            _ => return,
        };
        let stored = match provider.get_lexemes_by_ids(&keys).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "lexeme conflict lookup failed; writing local copy as-is");
                return;
            }
        };

        for (key, current) in keys.iter().zip(stored) {
            let Some(current) = current else { continue };
            let Some(Some(local_lexeme)) = batch.lexeme_updates.get(key) else {
                continue;
            };

            let mut merged = local_lexeme.clone();
            for id in current.contexts {
                if matches!(batch.thought_updates.get(&id), Some(None)) {
                    continue; // deleted by this batch
                }
                match store.thought(&id) {
                    Some(thought) if normalize(&thought.value) != merged.lemma => {
                        continue; // stale reference
                    }
                    _ => {}
                }
                merged.contexts.insert(id);
            }
            merged.created = merged.created.min(current.created);
            batch.lexeme_updates.insert(key.clone(), Some(merged));
        }
    }
}
