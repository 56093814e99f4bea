//! In-memory tree store: the single-writer index of thoughts-by-id and
//! lexemes-by-key.
//!
//! All mutation flows through the upsert/delete entry points here; no
//! other component writes to the index. The composite edit operations
//! (`create`, `edit_value`, `move_to`, `delete_subtree`) keep the
//! tree/lexeme invariants within one transaction and return the push
//! [`Batch`] describing the delta for persistence.

use crate::error::{PathError, StoreError};
use crate::model::{timestamp, Lexeme, Thought};
use crate::push::Batch;
use crate::text::{lexeme_key, normalize};
use crate::types::{is_root, ClientId, LexemeKey, ThoughtId, ABSOLUTE_ID, META_ID, ROOT_ID};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// One step of a [`Path`]: the thought id and its rank among siblings
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub id: ThoughtId,
    pub rank: f64,
}

/// Ordered `(id, rank)` pairs from a root down to a thought
pub type Path = Vec<PathSegment>;

/// Ordered ancestor values from a root down to a thought
pub type Context = Vec<String>;

/// In-memory index of thoughts and lexemes.
///
/// Pure data structure: never talks to a provider. Cross-transaction
/// dangling child references are expected transiently while remote
/// fetches are in flight and are communicated by the `pending` flag.
#[derive(Debug, Clone)]
pub struct TreeStore {
    thoughts: HashMap<ThoughtId, Thought>,
    lexemes: HashMap<LexemeKey, Lexeme>,
    client_id: ClientId,
}

impl TreeStore {
    /// An empty store seeded with the three sentinel roots
    pub fn new(client_id: impl Into<ClientId>) -> Self {
        let client_id = client_id.into();
        let mut thoughts = HashMap::new();
        for root in [ROOT_ID, META_ID, ABSOLUTE_ID] {
            thoughts.insert(
                root.to_string(),
                Thought::new(root, root, 0.0, None, client_id.clone()),
            );
        }
        TreeStore {
            thoughts,
            lexemes: HashMap::new(),
            client_id,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn thought(&self, id: &str) -> Option<&Thought> {
        self.thoughts.get(id)
    }

    pub fn lexeme(&self, key: &LexemeKey) -> Option<&Lexeme> {
        self.lexemes.get(key)
    }

    /// The lexeme currently filed under the live hash of `raw_value`
    pub fn lexeme_for(&self, raw_value: &str) -> Option<&Lexeme> {
        self.lexemes.get(&lexeme_key(raw_value))
    }

    pub fn thought_count(&self) -> usize {
        self.thoughts.len()
    }

    pub fn lexeme_count(&self) -> usize {
        self.lexemes.len()
    }

    pub fn thoughts(&self) -> impl Iterator<Item = &Thought> {
        self.thoughts.values()
    }

    // ---- primitive mutations -------------------------------------------

    pub fn upsert_thought(&mut self, thought: Thought) {
        self.thoughts.insert(thought.id.clone(), thought);
    }

    pub fn upsert_lexeme(&mut self, key: LexemeKey, lexeme: Lexeme) {
        self.lexemes.insert(key, lexeme);
    }

    pub fn delete_thought(&mut self, id: &str) -> Option<Thought> {
        self.thoughts.remove(id)
    }

    pub fn delete_lexeme(&mut self, key: &LexemeKey) -> Option<Lexeme> {
        self.lexemes.remove(key)
    }

    /// Fold a fetched thought into the index via the typed thought merge
    pub fn absorb_thought(&mut self, incoming: Thought) {
        let merged = match self.thoughts.get(&incoming.id) {
            Some(local) => Thought::merge(local, &incoming),
            None => incoming,
        };
        self.thoughts.insert(merged.id.clone(), merged);
    }

    /// Fold a fetched lexeme into the index via the typed lexeme merge
    pub fn absorb_lexeme(&mut self, key: LexemeKey, incoming: Lexeme) {
        let merged = match self.lexemes.get(&key) {
            Some(local) => Lexeme::merge(local, &incoming),
            None => incoming,
        };
        self.lexemes.insert(key, merged);
    }

    // ---- ordering ------------------------------------------------------

    /// Children of `id` ordered by rank, ties broken by id
    pub fn ordered_children(&self, id: &str) -> Vec<&Thought> {
        let Some(parent) = self.thoughts.get(id) else {
            return Vec::new();
        };
        let mut links: Vec<_> = parent.children.values().collect();
        links.sort_by(|a, b| {
            a.rank
                .partial_cmp(&b.rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        links
            .into_iter()
            .filter_map(|link| self.thoughts.get(&link.id))
            .collect()
    }

    /// A rank sorting after every current child of `parent_id`
    pub fn rank_after(&self, parent_id: &str) -> f64 {
        self.thoughts
            .get(parent_id)
            .and_then(|p| {
                p.children
                    .values()
                    .map(|c| c.rank)
                    .fold(None, |acc: Option<f64>, r| {
                        Some(acc.map_or(r, |a| a.max(r)))
                    })
            })
            .map(|max| max + 1.0)
            .unwrap_or(0.0)
    }

    /// A rank sorting between two sibling ranks; the midpoint, so
    /// reordering is O(1) with no renumbering of other siblings
    pub fn rank_between(before: f64, after: f64) -> f64 {
        before + (after - before) / 2.0
    }

    // ---- path / context ------------------------------------------------

    /// Resolve the path from a root down to `id` by walking `parent_id`
    /// links with an explicit visited set; a revisited id aborts this
    /// branch with the full cycle for diagnosis.
    pub fn path_to(&self, id: &str) -> Result<Path, PathError> {
        let mut segments: Vec<PathSegment> = Vec::new();
        let mut visited: HashSet<ThoughtId> = HashSet::new();
        let mut current = id.to_string();

        loop {
            if !visited.insert(current.clone()) {
                let mut cycle: Vec<ThoughtId> =
                    segments.iter().rev().map(|s| s.id.clone()).collect();
                cycle.push(current);
                return Err(PathError::CycleDetected(cycle));
            }
            let Some(thought) = self.thoughts.get(&current) else {
                return Err(PathError::AncestorMissing {
                    of: id.to_string(),
                    missing: current,
                });
            };
            segments.push(PathSegment {
                id: thought.id.clone(),
                rank: thought.rank,
            });
            match &thought.parent_id {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }

        segments.reverse();
        Ok(segments)
    }

    /// The ordered ancestor values for `id` (root first)
    pub fn context_of(&self, id: &str) -> Result<Context, PathError> {
        let path = self.path_to(id)?;
        Ok(path
            .iter()
            .filter_map(|seg| self.thoughts.get(&seg.id).map(|t| t.value.clone()))
            .collect())
    }

    // ---- composite edit operations -------------------------------------

    /// Create a thought under `parent_id` and return the persistence batch
    pub fn create(
        &mut self,
        id: impl Into<ThoughtId>,
        parent_id: &str,
        value: impl Into<String>,
        rank: f64,
    ) -> Result<Batch, StoreError> {
        let id = id.into();
        let value = value.into();
        if !self.thoughts.contains_key(parent_id) {
            return Err(StoreError::ThoughtNotFound(parent_id.to_string()));
        }

        let thought = Thought::new(
            id.clone(),
            value.clone(),
            rank,
            Some(parent_id.to_string()),
            self.client_id.clone(),
        );

        let mut batch = Batch::local_and_remote();

        let key = lexeme_key(&value);
        let client = self.client_id.clone();
        match self.lexemes.get_mut(&key) {
            Some(lexeme) => lexeme.add_context(&id, &client),
            None => {
                self.lexemes
                    .insert(key.clone(), Lexeme::for_thought(&value, &id, &client));
                // Key never pulled locally; push must reconcile it against
                // the backend copy before writing.
                batch.pending_lexemes.insert(key.clone());
            }
        }
        batch
            .lexeme_updates
            .insert(key.clone(), Some(self.lexemes[&key].clone()));

        let parent = self
            .thoughts
            .get_mut(parent_id)
            .expect("parent existence checked above");
        parent.children.insert(id.clone(), thought.child_link());
        parent.last_updated = timestamp();
        batch
            .thought_updates
            .insert(parent_id.to_string(), Some(parent.clone()));

        self.thoughts.insert(id.clone(), thought.clone());
        batch.thought_updates.insert(id.clone(), Some(thought));
        batch.recently_edited.insert(id);

        Ok(batch)
    }

    /// Change a thought's text, moving its id between lexemes
    pub fn edit_value(
        &mut self,
        id: &str,
        new_value: impl Into<String>,
    ) -> Result<Batch, StoreError> {
        let new_value = new_value.into();
        let old_value = match self.thoughts.get(id) {
            Some(t) => t.value.clone(),
            None => return Err(StoreError::ThoughtNotFound(id.to_string())),
        };

        let mut batch = Batch::local_and_remote();
        let client = self.client_id.clone();

        let old_key = lexeme_key(&old_value);
        if let Some(lexeme) = self.lexemes.get_mut(&old_key) {
            lexeme.remove_context(&id.to_string(), &client);
            if lexeme.contexts.is_empty() {
                self.lexemes.remove(&old_key);
                batch.lexeme_updates.insert(old_key, None);
            } else {
                batch
                    .lexeme_updates
                    .insert(old_key.clone(), Some(self.lexemes[&old_key].clone()));
            }
        }

        let new_key = lexeme_key(&new_value);
        match self.lexemes.get_mut(&new_key) {
            Some(lexeme) => lexeme.add_context(&id.to_string(), &client),
            None => {
                self.lexemes.insert(
                    new_key.clone(),
                    Lexeme::for_thought(&new_value, &id.to_string(), &client),
                );
                batch.pending_lexemes.insert(new_key.clone());
            }
        }
        batch
            .lexeme_updates
            .insert(new_key.clone(), Some(self.lexemes[&new_key].clone()));

        let thought = self
            .thoughts
            .get_mut(id)
            .expect("existence checked above");
        thought.value = new_value.clone();
        thought.last_updated = timestamp();
        thought.updated_by = client.clone();
        let parent_id = thought.parent_id.clone();
        let link = thought.child_link();
        batch
            .thought_updates
            .insert(id.to_string(), Some(thought.clone()));
        batch.recently_edited.insert(id.to_string());

        // Keep the parent's inline snapshot in agreement
        if let Some(parent_id) = parent_id {
            if let Some(parent) = self.thoughts.get_mut(&parent_id) {
                parent.children.insert(id.to_string(), link);
                parent.last_updated = timestamp();
                batch
                    .thought_updates
                    .insert(parent_id, Some(parent.clone()));
            }
        }

        Ok(batch)
    }

    /// Reparent and rerank a thought
    pub fn move_to(
        &mut self,
        id: &str,
        new_parent_id: &str,
        new_rank: f64,
    ) -> Result<Batch, StoreError> {
        if is_root(id) {
            return Err(StoreError::CannotMoveRoot(id.to_string()));
        }
        if !self.thoughts.contains_key(new_parent_id) {
            return Err(StoreError::ThoughtNotFound(new_parent_id.to_string()));
        }
        if !self.thoughts.contains_key(id) {
            return Err(StoreError::ThoughtNotFound(id.to_string()));
        }

        // Refuse to move a thought into its own subtree
        if let Ok(path) = self.path_to(new_parent_id) {
            if path.iter().any(|seg| seg.id == id) {
                return Err(StoreError::MoveIntoDescendant {
                    ancestor: id.to_string(),
                    descendant: new_parent_id.to_string(),
                });
            }
        }

        let mut batch = Batch::local_and_remote();
        let client = self.client_id.clone();
        let old_parent_id = self.thoughts[id].parent_id.clone();

        if let Some(old_parent_id) = old_parent_id {
            if old_parent_id != new_parent_id {
                if let Some(old_parent) = self.thoughts.get_mut(&old_parent_id) {
                    old_parent.children.remove(id);
                    old_parent.last_updated = timestamp();
                    batch
                        .thought_updates
                        .insert(old_parent_id, Some(old_parent.clone()));
                }
            }
        }

        let thought = self.thoughts.get_mut(id).expect("existence checked above");
        thought.parent_id = Some(new_parent_id.to_string());
        thought.rank = new_rank;
        thought.last_updated = timestamp();
        thought.updated_by = client;
        let link = thought.child_link();
        batch
            .thought_updates
            .insert(id.to_string(), Some(thought.clone()));
        batch.recently_edited.insert(id.to_string());

        let new_parent = self
            .thoughts
            .get_mut(new_parent_id)
            .expect("existence checked above");
        new_parent.children.insert(id.to_string(), link);
        new_parent.last_updated = timestamp();
        batch
            .thought_updates
            .insert(new_parent_id.to_string(), Some(new_parent.clone()));

        Ok(batch)
    }

    /// Delete a thought and its descendants.
    ///
    /// A thought with a duplicate sibling at the same value is not
    /// deep-deleted: the sibling will absorb its subtree during repair,
    /// so only the thought itself is removed.
    pub fn delete_subtree(&mut self, id: &str) -> Result<Batch, StoreError> {
        if is_root(id) {
            return Err(StoreError::CannotDeleteRoot(id.to_string()));
        }
        let target = self
            .thoughts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ThoughtNotFound(id.to_string()))?;

        let has_duplicate_sibling = target
            .parent_id
            .as_ref()
            .and_then(|pid| self.thoughts.get(pid))
            .map(|parent| {
                parent
                    .children
                    .values()
                    .any(|c| c.id != target.id && c.value == target.value)
            })
            .unwrap_or(false);

        let mut batch = Batch::local_and_remote();
        let client = self.client_id.clone();

        // Detach from the parent first
        if let Some(parent_id) = &target.parent_id {
            if let Some(parent) = self.thoughts.get_mut(parent_id) {
                parent.children.remove(id);
                parent.last_updated = timestamp();
                batch
                    .thought_updates
                    .insert(parent_id.clone(), Some(parent.clone()));
            }
        }

        let mut doomed = vec![target.id.clone()];
        if !has_duplicate_sibling {
            let mut queue: VecDeque<ThoughtId> =
                target.children.keys().cloned().collect();
            while let Some(next) = queue.pop_front() {
                if let Some(t) = self.thoughts.get(&next) {
                    queue.extend(t.children.keys().cloned());
                    doomed.push(next);
                }
            }
        } else {
            debug!(id, "duplicate sibling present; shallow delete");
        }

        for doomed_id in doomed {
            let Some(removed) = self.thoughts.remove(&doomed_id) else {
                continue;
            };
            let key = lexeme_key(&removed.value);
            if let Some(lexeme) = self.lexemes.get_mut(&key) {
                lexeme.remove_context(&doomed_id, &client);
                if lexeme.contexts.is_empty() {
                    self.lexemes.remove(&key);
                    batch.lexeme_updates.insert(key, None);
                } else {
                    batch
                        .lexeme_updates
                        .insert(key.clone(), Some(self.lexemes[&key].clone()));
                }
            }
            batch.thought_updates.insert(doomed_id, None);
        }

        Ok(batch)
    }
}
