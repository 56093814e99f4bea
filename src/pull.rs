//! Pull engine: breadth-first, depth/volume-bounded descendant
//! replication from a provider into the tree store.
//!
//! The traversal proceeds in waves: each wave fetches its thoughts and
//! their lexemes in one batched round-trip each, then decides per
//! thought whether to traverse (enqueue children) or buffer (mark
//! `pending`). Waves are strictly sequential; the caller folds each
//! yielded delta into the store and may abandon the stream at any point
//! without leaving the store inconsistent.

use crate::error::ProviderError;
use crate::model::{Lexeme, Thought};
use crate::provider::Provider;
use crate::store::TreeStore;
use crate::text::lexeme_key;
use crate::types::{LexemeKey, ThoughtId, META_ID};
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Fixed fetch pool for background subtree warming; beyond this there is
/// no benefit and the provider connection suffers
const WARM_FETCH_POOL: usize = 4;

/// Ids per batched request during warming
const WARM_CHUNK: usize = 32;

/// Depth/volume bounds for one pull call
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PullLimits {
    /// Levels below the start ids before buffering
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Global queued-thought budget across the whole call, not per level
    #[serde(default = "default_max_thoughts_queued")]
    pub max_thoughts_queued: usize,
}

fn default_max_depth() -> usize {
    4
}

fn default_max_thoughts_queued() -> usize {
    100
}

impl Default for PullLimits {
    fn default() -> Self {
        PullLimits {
            max_depth: default_max_depth(),
            max_thoughts_queued: default_max_thoughts_queued(),
        }
    }
}

/// Caller-side traversal state for one pull
#[derive(Clone, Default)]
pub struct PullOptions {
    pub limits: PullLimits,
    /// Ids expanded or pinned in the caller's view; never buffered
    pub expanded: HashSet<ThoughtId>,
    /// Focused id re-checked each wave and spliced to the front of the
    /// next fetch batch exactly once if still pending
    pub priority: Option<ThoughtId>,
    /// Advisory cancellation: suppresses further enqueuing only
    pub cancel: Arc<AtomicBool>,
}

/// One wave's worth of fetched state to fold into the store
#[derive(Debug, Clone, Default)]
pub struct PullDelta {
    pub thoughts: HashMap<ThoughtId, Thought>,
    pub lexemes: HashMap<LexemeKey, Lexeme>,
}

impl PullDelta {
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty() && self.lexemes.is_empty()
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    id: ThoughtId,
    depth: usize,
    /// Inside the meta-root subtree, which always loads in full
    in_meta: bool,
    /// Descendant of an `=archive` meta attribute; exempt from buffering
    archive_exempt: bool,
}

/// Breadth-first bounded descendant fetcher.
///
/// Restartable: each call to [`next_wave`](PullEngine::next_wave)
/// produces the next delta, or `None` when the traversal is complete.
pub struct PullEngine {
    provider: Arc<dyn Provider>,
    options: PullOptions,
    queue: VecDeque<QueueEntry>,
    visited: HashSet<ThoughtId>,
    queued_total: usize,
    priority_spliced: bool,
}

impl PullEngine {
    pub fn new(provider: Arc<dyn Provider>, start_ids: &[ThoughtId], options: PullOptions) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        for id in start_ids {
            if visited.insert(id.clone()) {
                queue.push_back(QueueEntry {
                    id: id.clone(),
                    depth: 0,
                    in_meta: id == META_ID,
                    archive_exempt: false,
                });
            }
        }
        let queued_total = queue.len();
        PullEngine {
            provider,
            options,
            queue,
            visited,
            queued_total,
            priority_spliced: false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.options.cancel.load(Ordering::Relaxed)
    }

    /// Fetch and classify the next wave. Returns `None` when the queue is
    /// exhausted. The caller is responsible for folding the delta into
    /// the store (or use [`run`](PullEngine::run) /
    /// [`into_stream`](PullEngine::into_stream)).
    #[instrument(skip(self, store), fields(queued = self.queue.len()))]
    pub async fn next_wave(
        &mut self,
        store: &RwLock<TreeStore>,
    ) -> Result<Option<PullDelta>, ProviderError> {
        self.splice_priority(store);

        if self.queue.is_empty() {
            return Ok(None);
        }
        let wave: Vec<QueueEntry> = self.queue.drain(..).collect();
        let ids: Vec<ThoughtId> = wave.iter().map(|e| e.id.clone()).collect();

        let records = self.provider.get_thoughts_by_ids(&ids).await?;
        let mut delta = PullDelta::default();
        let mut lexeme_keys: Vec<LexemeKey> = Vec::new();

        for (entry, record) in wave.into_iter().zip(records) {
            let Some(record) = record else {
                debug!(id = %entry.id, "requested thought absent from provider");
                continue;
            };
            let Some(mut thought) = record.into_thought() else {
                warn!(id = %entry.id, "dropping thought with missing value");
                continue;
            };

            lexeme_keys.push(lexeme_key(&thought.value));
            self.classify(store, &entry, &mut thought);
            delta.thoughts.insert(thought.id.clone(), thought);
        }

        if !lexeme_keys.is_empty() {
            let lexemes = self.provider.get_lexemes_by_ids(&lexeme_keys).await?;
            for (key, lexeme) in lexeme_keys.into_iter().zip(lexemes) {
                if let Some(lexeme) = lexeme {
                    delta.lexemes.insert(key, lexeme);
                }
            }
        }

        Ok(Some(delta))
    }

    /// Decide traverse vs. buffer for one fetched thought and enqueue
    /// accordingly. Mutates the thought's `pending` flag to match.
    fn classify(&mut self, store: &RwLock<TreeStore>, entry: &QueueEntry, thought: &mut Thought) {
        // A fetched parent reference we have never seen locally means this
        // branch was reached tangentially; fetch the parent too.
        if let Some(parent_id) = &thought.parent_id {
            let known_locally = store.read().thought(parent_id).is_some();
            if !known_locally && !self.visited.contains(parent_id) {
                self.enqueue(QueueEntry {
                    id: parent_id.clone(),
                    depth: entry.depth,
                    in_meta: entry.in_meta,
                    archive_exempt: entry.archive_exempt,
                });
            }
        }

        if thought.children.is_empty() {
            thought.pending = false;
            return;
        }

        if self.is_cancelled() {
            // In-flight fetches complete normally, but nothing further is
            // enqueued; marking pending keeps the result consistent.
            thought.pending = true;
            return;
        }

        let exempt = entry.in_meta
            || entry.archive_exempt
            || self.options.expanded.contains(&thought.id);
        let depth_reached = entry.depth >= self.options.limits.max_depth;
        let over_budget = self.queued_total + thought.children.len()
            > self.options.limits.max_thoughts_queued;

        if !exempt && (depth_reached || over_budget) {
            thought.pending = true;
            // Still discover pin status without loading the subtree
            if let Some(pin) = thought.children.values().find(|c| c.value == "=pin") {
                self.enqueue(QueueEntry {
                    id: pin.id.clone(),
                    depth: entry.depth + 1,
                    in_meta: entry.in_meta,
                    archive_exempt: entry.archive_exempt,
                });
            }
            return;
        }

        thought.pending = false;
        let in_meta = entry.in_meta || thought.id == META_ID;
        for link in thought.children.values() {
            self.enqueue(QueueEntry {
                id: link.id.clone(),
                depth: entry.depth + 1,
                in_meta,
                archive_exempt: entry.archive_exempt || link.value == "=archive",
            });
        }
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        if self.visited.insert(entry.id.clone()) {
            self.queued_total += 1;
            self.queue.push_back(entry);
        }
    }

    /// Splice the priority id to the front of the next fetch batch, at
    /// most once, so interactive focus is not starved behind a large
    /// background pull.
    fn splice_priority(&mut self, store: &RwLock<TreeStore>) {
        if self.priority_spliced {
            return;
        }
        let Some(priority) = self.options.priority.clone() else {
            return;
        };
        let still_pending = store
            .read()
            .thought(&priority)
            .map(|t| t.pending)
            .unwrap_or(false);
        if !still_pending {
            return;
        }
        self.priority_spliced = true;
        self.queue.retain(|e| e.id != priority);
        self.visited.insert(priority.clone());
        self.queue.push_front(QueueEntry {
            id: priority,
            depth: 0,
            in_meta: false,
            archive_exempt: false,
        });
    }

    /// Drive the traversal to completion, folding every delta into the
    /// store. Returns the number of waves processed.
    pub async fn run(mut self, store: &RwLock<TreeStore>) -> Result<usize, ProviderError> {
        let mut waves = 0;
        while let Some(delta) = self.next_wave(store).await? {
            fold_delta(store, &delta);
            waves += 1;
        }
        Ok(waves)
    }

    /// Lazy, finite, producer-driven stream of deltas; each delta is
    /// folded into the store before it is yielded, so abandoning the
    /// stream never leaves the store inconsistent.
    pub fn into_stream(
        self,
        store: Arc<RwLock<TreeStore>>,
    ) -> impl futures::Stream<Item = Result<PullDelta, ProviderError>> {
        futures::stream::try_unfold((self, store), |(mut engine, store)| async move {
            match engine.next_wave(&store).await? {
                Some(delta) => {
                    fold_delta(&store, &delta);
                    Ok(Some((delta, (engine, store))))
                }
                None => Ok(None),
            }
        })
    }
}

/// Fold one delta into the store through the typed merges
pub fn fold_delta(store: &RwLock<TreeStore>, delta: &PullDelta) {
    let mut store = store.write();
    for thought in delta.thoughts.values() {
        store.absorb_thought(thought.clone());
    }
    for (key, lexeme) in &delta.lexemes {
        store.absorb_lexeme(key.clone(), lexeme.clone());
    }
}

/// Eagerly replicate a whole subtree into the store with a bounded
/// fetch pool, outside the main pull path. Everything fetched is fully
/// traversed, so nothing is marked pending.
#[instrument(skip(provider, store))]
pub async fn warm_subtree(
    provider: Arc<dyn Provider>,
    store: &RwLock<TreeStore>,
    root: &ThoughtId,
) -> Result<usize, ProviderError> {
    let mut visited: HashSet<ThoughtId> = HashSet::from([root.clone()]);
    let mut level: Vec<ThoughtId> = vec![root.clone()];
    let mut absorbed = 0;

    while !level.is_empty() {
        let chunks: Vec<Vec<ThoughtId>> = level
            .chunks(WARM_CHUNK)
            .map(|chunk| chunk.to_vec())
            .collect();

        let fetched: Vec<Vec<Option<crate::model::ThoughtRecord>>> =
            futures::stream::iter(chunks.into_iter().map(|chunk| {
                let provider = provider.clone();
                async move { provider.get_thoughts_by_ids(&chunk).await }
            }))
            .buffer_unordered(WARM_FETCH_POOL)
            .try_collect()
            .await?;

        let mut next_level: Vec<ThoughtId> = Vec::new();
        let mut lexeme_keys: Vec<LexemeKey> = Vec::new();

        for record in fetched.into_iter().flatten().flatten() {
            let Some(mut thought) = record.into_thought() else {
                continue;
            };
            thought.pending = false;
            lexeme_keys.push(lexeme_key(&thought.value));
            for child in thought.children.values() {
                if visited.insert(child.id.clone()) {
                    next_level.push(child.id.clone());
                }
            }
            store.write().absorb_thought(thought);
            absorbed += 1;
        }

        if !lexeme_keys.is_empty() {
            let lexemes = provider.get_lexemes_by_ids(&lexeme_keys).await?;
            let mut guard = store.write();
            for (key, lexeme) in lexeme_keys.into_iter().zip(lexemes) {
                if let Some(lexeme) = lexeme {
                    guard.absorb_lexeme(key, lexeme);
                }
            }
        }

        level = next_level;
    }

    debug!(absorbed, "warmed subtree");
    Ok(absorbed)
}
