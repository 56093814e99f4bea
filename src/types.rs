//! Core identifier and timestamp types for the thought/lexeme store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, globally unique thought identifier
pub type ThoughtId = String;

/// Device/session identifier recorded on every mutation
pub type ClientId = String;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// The home root: parentless container of all user thoughts
pub const ROOT_ID: &str = "__ROOT__";

/// The meta root: hosts system/meta content; always loaded in full
pub const META_ID: &str = "__META__";

/// The absolute root: parentless container above both other roots
pub const ABSOLUTE_ID: &str = "__ABSOLUTE__";

/// Synthetic container created on demand by the repair engine to hold
/// thoughts whose parent no longer exists
pub const ORPHANAGE_ID: &str = "__ORPHANAGE__";

/// All parentless sentinel ids
pub const ROOT_IDS: [&str; 3] = [ROOT_ID, META_ID, ABSOLUTE_ID];

/// Whether `id` is one of the three parentless sentinel roots
pub fn is_root(id: &str) -> bool {
    ROOT_IDS.contains(&id)
}

/// Meta attributes are thoughts whose value starts with `=` (e.g. `=pin`,
/// `=archive`); they configure behavior rather than carry content.
pub fn is_meta_attribute(value: &str) -> bool {
    value.starts_with('=')
}

/// Lookup key for a lexeme: fixed-width content hash of the raw thought
/// value, rendered as lowercase hex.
///
/// The key is a function of the raw (non-normalized) text. Because the
/// hash algorithm has changed historically, a stored key can drift out of
/// agreement with the live thought text; see the repair engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LexemeKey(pub String);

impl LexemeKey {
    /// Compute the lexeme key for a raw thought value
    pub fn of(raw_value: &str) -> Self {
        LexemeKey(hex::encode(blake3::hash(raw_value.as_bytes()).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LexemeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for LexemeKey {
    fn from(s: String) -> Self {
        LexemeKey(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexeme_key_deterministic() {
        assert_eq!(LexemeKey::of("hello"), LexemeKey::of("hello"));
        assert_ne!(LexemeKey::of("hello"), LexemeKey::of("Hello"));
    }

    #[test]
    fn test_lexeme_key_is_hex() {
        let key = LexemeKey::of("anything");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_root_ids() {
        assert!(is_root(ROOT_ID));
        assert!(is_root(META_ID));
        assert!(is_root(ABSOLUTE_ID));
        assert!(!is_root(ORPHANAGE_ID));
        assert!(!is_root("some-thought"));
    }

    #[test]
    fn test_meta_attribute() {
        assert!(is_meta_attribute("=pin"));
        assert!(is_meta_attribute("=archive"));
        assert!(!is_meta_attribute("pinboard"));
    }
}
