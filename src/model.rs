//! Data model: Thought, Lexeme, and the wire shapes exchanged with
//! providers and snapshots.
//!
//! Invariants (enforced by the store's mutation entry points and checked
//! by the repair engine, never assumed):
//! - every non-root thought has exactly one parent, and its `parent_id`
//!   equals that parent's id ("back-pointer consistency");
//! - a lexeme's `contexts` holds exactly the ids of thoughts whose
//!   normalized value equals its `lemma`;
//! - a thought marked `pending` has a subtree that is not fully loaded,
//!   and its `children` map is never authoritative for reachability.

use crate::text::normalize;
use crate::types::{ClientId, ThoughtId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current wall-clock timestamp in epoch milliseconds
pub fn timestamp() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Inline child summary kept in a parent's `children` map.
///
/// Duplicates the child's own `value`/`rank` so a parent can be rendered
/// without loading every child; the child's own record is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildLink {
    pub id: ThoughtId,
    pub value: String,
    pub rank: f64,
}

/// A single tree node with text, rank, parent link, and children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: ThoughtId,
    pub value: String,
    /// Float rank for O(1) sibling reordering; display order is by rank,
    /// ties broken by id
    pub rank: f64,
    /// `None` only for the three sentinel roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ThoughtId>,
    #[serde(default)]
    pub children: BTreeMap<ThoughtId, ChildLink>,
    pub last_updated: Timestamp,
    pub updated_by: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<Timestamp>,
    /// Subtree known incomplete; children may be a placeholder
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl Thought {
    pub fn new(
        id: impl Into<ThoughtId>,
        value: impl Into<String>,
        rank: f64,
        parent_id: Option<ThoughtId>,
        updated_by: impl Into<ClientId>,
    ) -> Self {
        Thought {
            id: id.into(),
            value: value.into(),
            rank,
            parent_id,
            children: BTreeMap::new(),
            last_updated: timestamp(),
            updated_by: updated_by.into(),
            archived: None,
            pending: false,
        }
    }

    /// The inline summary of this thought for its parent's children map
    pub fn child_link(&self) -> ChildLink {
        ChildLink {
            id: self.id.clone(),
            value: self.value.clone(),
            rank: self.rank,
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Merge a freshly fetched copy over a local copy.
    ///
    /// Last-write-wins on `last_updated`, with one exception: an incoming
    /// pending placeholder never replaces a local copy whose subtree is
    /// already fully loaded.
    pub fn merge(local: &Thought, incoming: &Thought) -> Thought {
        if incoming.pending && !local.pending {
            return local.clone();
        }
        if incoming.last_updated >= local.last_updated {
            incoming.clone()
        } else {
            local.clone()
        }
    }
}

/// Inverted-index entry mapping a normalized text form (lemma) to the
/// set of thought ids currently carrying that text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lexeme {
    pub lemma: String,
    #[serde(default)]
    pub contexts: BTreeSet<ThoughtId>,
    pub created: Timestamp,
    pub last_updated: Timestamp,
    pub updated_by: ClientId,
}

impl Lexeme {
    /// A fresh lexeme for `raw_value` containing a single context
    pub fn for_thought(
        raw_value: &str,
        id: &ThoughtId,
        updated_by: impl Into<ClientId>,
    ) -> Self {
        let now = timestamp();
        Lexeme {
            lemma: normalize(raw_value),
            contexts: BTreeSet::from([id.clone()]),
            created: now,
            last_updated: now,
            updated_by: updated_by.into(),
        }
    }

    pub fn add_context(&mut self, id: &ThoughtId, updated_by: &str) {
        if self.contexts.insert(id.clone()) {
            self.last_updated = timestamp();
            self.updated_by = updated_by.to_string();
        }
    }

    pub fn remove_context(&mut self, id: &ThoughtId, updated_by: &str) {
        if self.contexts.remove(id) {
            self.last_updated = timestamp();
            self.updated_by = updated_by.to_string();
        }
    }

    /// Merge a fetched copy over a local copy: contexts are unioned, the
    /// newer metadata wins. Callers that need stale-context filtering
    /// (the push engine) filter before calling this.
    pub fn merge(local: &Lexeme, incoming: &Lexeme) -> Lexeme {
        let newer = if incoming.last_updated >= local.last_updated {
            incoming
        } else {
            local
        };
        Lexeme {
            lemma: newer.lemma.clone(),
            contexts: local.contexts.union(&incoming.contexts).cloned().collect(),
            created: local.created.min(incoming.created),
            last_updated: newer.last_updated,
            updated_by: newer.updated_by.clone(),
        }
    }
}

/// Wire shape of a thought as providers and snapshots carry it.
///
/// `value` is optional on the wire: historical data contains null-valued
/// placeholder rows, which the pull engine drops with a warning and the
/// repair engine classifies (placeholder vs. fatal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtRecord {
    pub id: ThoughtId,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub rank: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ThoughtId>,
    #[serde(default)]
    pub children: BTreeMap<ThoughtId, ChildLink>,
    #[serde(default)]
    pub last_updated: Timestamp,
    #[serde(default)]
    pub updated_by: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl ThoughtRecord {
    /// Convert to an in-memory thought; `None` when the record carries no
    /// value (placeholder rows)
    pub fn into_thought(self) -> Option<Thought> {
        let value = self.value?;
        Some(Thought {
            id: self.id,
            value,
            rank: self.rank,
            parent_id: self.parent_id,
            children: self.children,
            last_updated: self.last_updated,
            updated_by: self.updated_by,
            archived: self.archived,
            pending: self.pending,
        })
    }
}

impl From<&Thought> for ThoughtRecord {
    fn from(t: &Thought) -> Self {
        ThoughtRecord {
            id: t.id.clone(),
            value: Some(t.value.clone()),
            rank: t.rank,
            parent_id: t.parent_id.clone(),
            children: t.children.clone(),
            last_updated: t.last_updated,
            updated_by: t.updated_by.clone(),
            archived: t.archived,
            pending: t.pending,
        }
    }
}
