//! Offline integrity repair: scans a whole, migrated snapshot and heals
//! structural corruption in ordered passes.
//!
//! Pass order matters: each pass assumes the previous ones already hold.
//! The engine is idempotent — a second run over its own output changes
//! nothing and reports zero healed counters. Unreachable thoughts are
//! reported but never deleted: the responsible ancestor link may itself
//! be the bug.

use crate::error::RepairError;
use crate::model::{ChildLink, Lexeme, ThoughtRecord};
use crate::snapshot::Database;
use crate::text::{lexeme_key, normalize};
use crate::types::{is_root, LexemeKey, ThoughtId, ORPHANAGE_ID, ROOT_ID, ROOT_IDS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, info, instrument, warn};

/// Named counters for every pass; the operator-facing report.
///
/// `residualLemmaMismatches` and `missingParentsAfterRepair` are
/// "should never happen" counters: a nonzero value signals a defect
/// warranting manual inspection, not something to auto-heal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub null_sentinels_dropped: usize,
    pub num_orphans: usize,
    pub missing_lexemes_reconstructed: usize,
    pub missing_children_reconstructed: usize,
    pub duplicate_child_attributions_stripped: usize,
    pub parent_backlinks_repaired: usize,
    pub duplicate_siblings_merged: usize,
    pub unreachable_thoughts: usize,
    pub dangling_contexts_pruned: usize,
    pub lexeme_contexts_moved: usize,
    pub residual_lemma_mismatches: usize,
    pub lexeme_context_gaps_filled: usize,
    pub missing_parents_after_repair: usize,
}

impl RepairReport {
    /// Total healed changes; excludes the advisory unreachable count and
    /// the should-never-happen counters
    pub fn total_changes(&self) -> usize {
        self.null_sentinels_dropped
            + self.num_orphans
            + self.missing_lexemes_reconstructed
            + self.missing_children_reconstructed
            + self.duplicate_child_attributions_stripped
            + self.parent_backlinks_repaired
            + self.duplicate_siblings_merged
            + self.dangling_contexts_pruned
            + self.lexeme_contexts_moved
            + self.lexeme_context_gaps_filled
    }

    /// Whether any should-never-happen counter is nonzero
    pub fn has_anomalies(&self) -> bool {
        self.residual_lemma_mismatches > 0 || self.missing_parents_after_repair > 0
    }
}

/// Run all repair passes over a migrated snapshot in place.
#[instrument(skip(db), fields(thoughts = db.thought_index.len()))]
pub fn repair(db: &mut Database) -> Result<RepairReport, RepairError> {
    let mut report = RepairReport::default();

    ensure_roots(&mut db.thought_index);
    drop_null_sentinels(db, &mut report)?;
    relocate_orphans(db, &mut report);
    reconstruct_missing(db, &mut report);
    fix_attributions(db, &mut report);
    merge_duplicate_siblings(db, &mut report);
    let reachable = scan_reachability(db, &mut report);
    reconcile_lexemes(db, &mut report);
    fill_context_gaps(db, &reachable, &mut report);
    verify(db, &mut report);

    if report.has_anomalies() {
        warn!(?report, "repair finished with should-never-happen counters");
    } else {
        info!(changes = report.total_changes(), "repair finished");
    }
    Ok(report)
}

fn value_of(t: &ThoughtRecord) -> &str {
    t.value.as_deref().unwrap_or("")
}

/// The sentinel roots may be absent from exported snapshots; restore
/// them so parent resolution has stable anchors.
fn ensure_roots(thoughts: &mut BTreeMap<ThoughtId, ThoughtRecord>) {
    for root in ROOT_IDS {
        thoughts.entry(root.to_string()).or_insert_with(|| {
            debug!(root, "restoring missing sentinel root");
            ThoughtRecord {
                id: root.to_string(),
                value: Some(root.to_string()),
                rank: 0.0,
                parent_id: None,
                children: BTreeMap::new(),
                last_updated: 0,
                updated_by: "repair".to_string(),
                archived: None,
                pending: false,
            }
        });
    }
}

/// Pass 1: drop null-valued placeholder sentinels (pending and
/// childless). Any other missing value is a fatal invariant violation.
fn drop_null_sentinels(db: &mut Database, report: &mut RepairReport) -> Result<(), RepairError> {
    let mut doomed: Vec<ThoughtId> = Vec::new();
    for (id, t) in &db.thought_index {
        if t.value.is_some() {
            continue;
        }
        if t.pending && t.children.is_empty() {
            doomed.push(id.clone());
        } else {
            return Err(RepairError::UndefinedValue(id.clone()));
        }
    }

    for id in doomed {
        db.thought_index.remove(&id);
        // Strip dangling links so later passes do not resurrect the row
        for parent in db.thought_index.values_mut() {
            parent.children.remove(&id);
        }
        report.null_sentinels_dropped += 1;
    }
    Ok(())
}

/// Pass 2: relocate thoughts with an unresolvable parent into the
/// orphanage container. Data loss is avoided in favor of visibility.
fn relocate_orphans(db: &mut Database, report: &mut RepairReport) {
    // A missing parent that some existing thought still links as a child
    // will be reconstructed in pass 3; its children are not orphans.
    let reconstructable: HashSet<&ThoughtId> = db
        .thought_index
        .values()
        .flat_map(|t| t.children.keys())
        .collect();

    let orphans: Vec<ThoughtId> = db
        .thought_index
        .iter()
        .filter(|(id, t)| {
            !is_root(id)
                && match &t.parent_id {
                    Some(parent) => {
                        !db.thought_index.contains_key(parent)
                            && !reconstructable.contains(parent)
                    }
                    None => true,
                }
        })
        .map(|(id, _)| id.clone())
        .collect();

    if orphans.is_empty() {
        return;
    }

    ensure_orphanage(db);
    for id in orphans {
        let link = {
            let t = db.thought_index.get_mut(&id).expect("orphan id from index");
            t.parent_id = Some(ORPHANAGE_ID.to_string());
            ChildLink {
                id: id.clone(),
                value: value_of(t).to_string(),
                rank: t.rank,
            }
        };
        db.thought_index
            .get_mut(ORPHANAGE_ID)
            .expect("orphanage ensured above")
            .children
            .insert(id.clone(), link);
        report.num_orphans += 1;
        debug!(id, "relocated orphan");
    }
}

fn ensure_orphanage(db: &mut Database) {
    if db.thought_index.contains_key(ORPHANAGE_ID) {
        return;
    }
    let orphanage = ThoughtRecord {
        id: ORPHANAGE_ID.to_string(),
        value: Some("orphanage".to_string()),
        rank: f64::MAX / 2.0,
        parent_id: Some(ROOT_ID.to_string()),
        children: BTreeMap::new(),
        last_updated: 0,
        updated_by: "repair".to_string(),
        archived: None,
        pending: false,
    };
    db.thought_index
        .get_mut(ROOT_ID)
        .expect("roots ensured before passes")
        .children
        .insert(
            ORPHANAGE_ID.to_string(),
            ChildLink {
                id: ORPHANAGE_ID.to_string(),
                value: "orphanage".to_string(),
                rank: orphanage.rank,
            },
        );
    db.thought_index
        .insert(ORPHANAGE_ID.to_string(), orphanage);

    let key = lexeme_key("orphanage");
    db.lexeme_index.entry(key).or_insert_with(|| {
        Lexeme::for_thought("orphanage", &ORPHANAGE_ID.to_string(), "repair")
    });
}

/// Pass 3: reconstruct missing lexemes for indexed thoughts and missing
/// children referenced from a parent's inline children map. Grandchild
/// hints come from the index only; nothing is invented.
fn reconstruct_missing(db: &mut Database, report: &mut RepairReport) {
    for (id, t) in &db.thought_index {
        if is_root(id) {
            continue;
        }
        let key = lexeme_key(value_of(t));
        if !db.lexeme_index.contains_key(&key) {
            db.lexeme_index
                .insert(key, Lexeme::for_thought(value_of(t), id, "repair"));
            report.missing_lexemes_reconstructed += 1;
        }
    }

    let mut creations: Vec<ThoughtRecord> = Vec::new();
    for parent in db.thought_index.values() {
        for link in parent.children.values() {
            if db.thought_index.contains_key(&link.id) {
                continue;
            }
            let grandchildren: BTreeMap<ThoughtId, ChildLink> = db
                .thought_index
                .values()
                .filter(|t| t.parent_id.as_deref() == Some(link.id.as_str()))
                .map(|t| {
                    (
                        t.id.clone(),
                        ChildLink {
                            id: t.id.clone(),
                            value: value_of(t).to_string(),
                            rank: t.rank,
                        },
                    )
                })
                .collect();
            creations.push(ThoughtRecord {
                id: link.id.clone(),
                value: Some(link.value.clone()),
                rank: link.rank,
                parent_id: Some(parent.id.clone()),
                children: grandchildren,
                last_updated: 0,
                updated_by: "repair".to_string(),
                archived: None,
                pending: false,
            });
        }
    }
    for created in creations {
        debug!(id = %created.id, "reconstructed child from inline link");
        let key = lexeme_key(value_of(&created));
        if !db.lexeme_index.contains_key(&key) {
            db.lexeme_index.insert(
                key,
                Lexeme::for_thought(value_of(&created), &created.id, "repair"),
            );
            report.missing_lexemes_reconstructed += 1;
        }
        db.thought_index.insert(created.id.clone(), created);
        report.missing_children_reconstructed += 1;
    }
}

/// Pass 4: resolve multi-parent attributions (keep the most specific
/// existing parent, strip the rest) and repair back-pointer drift in
/// both directions.
fn fix_attributions(db: &mut Database, report: &mut RepairReport) {
    let mut containers: HashMap<ThoughtId, Vec<ThoughtId>> = HashMap::new();
    for parent in db.thought_index.values() {
        for child_id in parent.children.keys() {
            containers
                .entry(child_id.clone())
                .or_default()
                .push(parent.id.clone());
        }
    }

    // Multi-parent: keep the recorded parent when it is among the
    // claimants, else the deepest (most specific) container.
    for (child_id, mut claimants) in containers.clone() {
        if claimants.len() < 2 {
            continue;
        }
        claimants.sort();
        let recorded = db
            .thought_index
            .get(&child_id)
            .and_then(|t| t.parent_id.clone());
        let keeper = match recorded {
            Some(p) if claimants.contains(&p) => p,
            _ => claimants
                .iter()
                .max_by_key(|c| (depth_of(&db.thought_index, c), std::cmp::Reverse((*c).clone())))
                .expect("claimants nonempty")
                .clone(),
        };
        for claimant in &claimants {
            if *claimant == keeper {
                continue;
            }
            if let Some(parent) = db.thought_index.get_mut(claimant) {
                parent.children.remove(&child_id);
                report.duplicate_child_attributions_stripped += 1;
            }
        }
        containers.insert(child_id, vec![keeper]);
    }

    // Back-pointer drift: the actual container wins over the recorded
    // parent_id; a parent missing its child's link gets the link added.
    let ids: Vec<ThoughtId> = db.thought_index.keys().cloned().collect();
    for id in ids {
        if is_root(&id) {
            continue;
        }
        let container = containers.get(&id).and_then(|c| c.first()).cloned();
        let (recorded, link) = {
            let t = &db.thought_index[&id];
            (t.parent_id.clone(), ChildLink {
                id: id.clone(),
                value: value_of(t).to_string(),
                rank: t.rank,
            })
        };
        match container {
            Some(container) => {
                if recorded.as_ref() != Some(&container) {
                    db.thought_index
                        .get_mut(&id)
                        .expect("id from index")
                        .parent_id = Some(container);
                    report.parent_backlinks_repaired += 1;
                }
            }
            None => {
                // Recorded parent exists (pass 2) but does not list this
                // child; restore the forward link.
                if let Some(parent_id) = recorded {
                    if let Some(parent) = db.thought_index.get_mut(&parent_id) {
                        parent.children.insert(id.clone(), link);
                        report.parent_backlinks_repaired += 1;
                    }
                }
            }
        }
    }
}

/// Depth of a thought from its root, cycle-guarded; deeper is more
/// specific for attribution purposes.
fn depth_of(thoughts: &BTreeMap<ThoughtId, ThoughtRecord>, id: &ThoughtId) -> usize {
    let mut depth = 0;
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = id.as_str();
    while let Some(t) = thoughts.get(current) {
        if !visited.insert(current) {
            break;
        }
        match t.parent_id.as_deref() {
            Some(parent) => {
                depth += 1;
                current = parent;
            }
            None => break,
        }
    }
    depth
}

/// Pass 5: merge duplicate siblings breadth-first from all roots.
///
/// Two children of the same parent sharing a value collapse into one
/// survivor: children and lexeme contexts are unioned, the duplicate's
/// row is deleted, and its former children are reassigned. Newly merged
/// children are re-processed on the next level.
fn merge_duplicate_siblings(db: &mut Database, report: &mut RepairReport) {
    let mut queue: VecDeque<ThoughtId> =
        ROOT_IDS.iter().map(|r| r.to_string()).collect();
    let mut visited: HashSet<ThoughtId> = queue.iter().cloned().collect();

    while let Some(parent_id) = queue.pop_front() {
        let Some(parent) = db.thought_index.get(&parent_id) else {
            continue;
        };

        let mut by_value: BTreeMap<String, Vec<(f64, ThoughtId)>> = BTreeMap::new();
        for link in parent.children.values() {
            if db.thought_index.contains_key(&link.id) {
                by_value
                    .entry(link.value.clone())
                    .or_default()
                    .push((link.rank, link.id.clone()));
            }
        }

        for (_, mut group) in by_value {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
            let survivor_id = group[0].1.clone();
            for (_, dup_id) in group.into_iter().skip(1) {
                absorb_duplicate(db, &parent_id, &survivor_id, &dup_id);
                report.duplicate_siblings_merged += 1;
            }
        }

        if let Some(parent) = db.thought_index.get(&parent_id) {
            for child_id in parent.children.keys() {
                if visited.insert(child_id.clone()) {
                    queue.push_back(child_id.clone());
                }
            }
        }
    }
}

fn absorb_duplicate(db: &mut Database, parent_id: &str, survivor_id: &str, dup_id: &str) {
    let Some(dup) = db.thought_index.remove(dup_id) else {
        return;
    };
    debug!(survivor = survivor_id, duplicate = dup_id, "merging duplicate sibling");

    // Cascade: the duplicate's children move under the survivor
    for (child_id, link) in dup.children {
        if let Some(child) = db.thought_index.get_mut(&child_id) {
            child.parent_id = Some(survivor_id.to_string());
        }
        if let Some(survivor) = db.thought_index.get_mut(survivor_id) {
            survivor.children.entry(child_id).or_insert(link);
        }
    }

    if let Some(parent) = db.thought_index.get_mut(parent_id) {
        parent.children.remove(dup_id);
    }

    // Lexeme contexts: duplicate out, survivor in (same raw value, same key)
    let key = lexeme_key(dup.value.as_deref().unwrap_or(""));
    if let Some(lexeme) = db.lexeme_index.get_mut(&key) {
        lexeme.contexts.remove(dup_id);
        lexeme.contexts.insert(survivor_id.to_string());
    }
}

/// Pass 6: breadth-first reachability from all roots; unreachable
/// thoughts are counted and reported, never deleted or relocated.
fn scan_reachability(db: &Database, report: &mut RepairReport) -> HashSet<ThoughtId> {
    let mut reached: HashSet<ThoughtId> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for root in ROOT_IDS {
        if db.thought_index.contains_key(root) {
            reached.insert(root.to_string());
            queue.push_back(root);
        }
    }
    while let Some(id) = queue.pop_front() {
        let Some(t) = db.thought_index.get(id) else {
            continue;
        };
        for child_id in t.children.keys() {
            if db.thought_index.contains_key(child_id) && reached.insert(child_id.clone()) {
                queue.push_back(child_id.as_str());
            }
        }
    }

    let unreachable = db.thought_index.len() - reached.len();
    if unreachable > 0 {
        warn!(unreachable, "unreachable thoughts detected (reported only)");
    }
    report.unreachable_thoughts = unreachable;
    reached
}

/// Pass 7: lexeme/context reconciliation — prune dangling contexts, then
/// move every thought filed under a lexeme whose lemma no longer matches
/// its normalized value to the lexeme keyed by its live hash.
fn reconcile_lexemes(db: &mut Database, report: &mut RepairReport) {
    for lexeme in db.lexeme_index.values_mut() {
        let before = lexeme.contexts.len();
        lexeme
            .contexts
            .retain(|id| db.thought_index.contains_key(id));
        report.dangling_contexts_pruned += before - lexeme.contexts.len();
    }

    // Collect moves first: (from_key, id, live_key, live_lemma)
    let mut moves: Vec<(LexemeKey, ThoughtId, LexemeKey, String)> = Vec::new();
    for (key, lexeme) in &db.lexeme_index {
        for id in &lexeme.contexts {
            let thought = &db.thought_index[id];
            let lemma = normalize(value_of(thought));
            if lemma != lexeme.lemma {
                let live_key = lexeme_key(value_of(thought));
                if live_key != *key {
                    moves.push((key.clone(), id.clone(), live_key, lemma));
                }
            }
        }
    }
    for (from_key, id, live_key, lemma) in moves {
        if let Some(from) = db.lexeme_index.get_mut(&from_key) {
            from.contexts.remove(&id);
        }
        let value = value_of(&db.thought_index[&id]).to_string();
        db.lexeme_index
            .entry(live_key)
            .or_insert_with(|| {
                let mut lex = Lexeme::for_thought(&value, &id, "repair");
                lex.lemma = lemma;
                lex.contexts.clear();
                lex
            })
            .contexts
            .insert(id);
        report.lexeme_contexts_moved += 1;
    }

    // Residual mismatches after the move step are a logic error: flag,
    // never silently drop.
    for lexeme in db.lexeme_index.values() {
        for id in &lexeme.contexts {
            let lemma = normalize(value_of(&db.thought_index[id]));
            if lemma != lexeme.lemma {
                warn!(%id, lemma, filed = %lexeme.lemma, "residual lemma mismatch");
                report.residual_lemma_mismatches += 1;
            }
        }
    }
}

/// Pass 8: every reachable thought's id is present in the contexts of
/// the lexeme its current value hashes to. Idempotent fill-gaps pass.
fn fill_context_gaps(
    db: &mut Database,
    reachable: &HashSet<ThoughtId>,
    report: &mut RepairReport,
) {
    for id in reachable {
        if is_root(id) {
            continue;
        }
        let Some(t) = db.thought_index.get(id) else {
            continue;
        };
        let value = value_of(t).to_string();
        let key = lexeme_key(&value);
        let lexeme = db
            .lexeme_index
            .entry(key)
            .or_insert_with(|| {
                report.missing_lexemes_reconstructed += 1;
                let mut lex = Lexeme::for_thought(&value, id, "repair");
                lex.contexts.clear();
                lex
            });
        if lexeme.contexts.insert(id.clone()) {
            report.lexeme_context_gaps_filled += 1;
        }
    }
}

/// Final verification: count should-never-happen states left behind.
fn verify(db: &Database, report: &mut RepairReport) {
    for (id, t) in &db.thought_index {
        if is_root(id) {
            continue;
        }
        let resolved = t
            .parent_id
            .as_ref()
            .map(|p| db.thought_index.contains_key(p))
            .unwrap_or(false);
        if !resolved {
            report.missing_parents_after_repair += 1;
        }
    }
}
