//! Grove: thought/lexeme data store for an outline editor.
//!
//! Keeps a tree of thoughts and an inverted text index mutually
//! consistent across incremental in-memory edits, a local persistent
//! store, an intermittently reachable remote replica, and historical
//! schema versions of previously-saved data.

pub mod config;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod provider;
pub mod pull;
pub mod push;
pub mod repair;
pub mod snapshot;
pub mod store;
pub mod text;
pub mod types;
