//! Text normalization and lexeme key hashing.
//!
//! `normalize` maps raw thought text to its lemma: the case-folded,
//! diacritic- and punctuation-stripped form used as a lexeme's logical
//! key. `lexeme_key` hashes the RAW text, not the lemma, so two raw
//! strings with the same lemma still index under different keys.

use crate::types::LexemeKey;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize raw thought text to its lemma.
///
/// Deterministic and pure: decomposes to NFD and drops combining marks,
/// lowercases, strips everything that is not alphanumeric or whitespace,
/// and collapses runs of whitespace to single spaces.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the storage key for raw thought text.
///
/// Callers must rehash stored keys whenever this function or the
/// normalization rules change; stale keys are repaired, never assumed
/// valid.
pub fn lexeme_key(raw_text: &str) -> LexemeKey {
    LexemeKey::of(raw_text)
}
