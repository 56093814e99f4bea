//! The sled local cache exercised through the push/pull surface,
//! including persistence across process restarts (reopen).

use grove::provider::{Provider, SledProvider};
use grove::pull::{fold_delta, PullEngine, PullOptions};
use grove::push::PushEngine;
use grove::store::TreeStore;
use grove::types::ROOT_ID;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SCHEMA: u32 = 4;

#[tokio::test]
async fn test_edits_survive_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let provider = Arc::new(SledProvider::open(temp.path(), SCHEMA).unwrap());
        let push = PushEngine::new(
            Some(provider.clone()),
            None,
            Duration::from_millis(0),
            SCHEMA,
        );
        let mut store = TreeStore::new("laptop");
        push.enqueue(store.create("inbox", ROOT_ID, "Inbox", 0.0).unwrap());
        push.enqueue(store.create("t1", "inbox", "call the plumber", 0.0).unwrap());
        push.flush(&store).await.unwrap();
    }

    // Fresh handle over the same files, as after a restart
    let provider = Arc::new(SledProvider::open(temp.path(), SCHEMA).unwrap());
    let reader = RwLock::new(TreeStore::new("laptop"));
    let mut pull = PullEngine::new(
        provider.clone(),
        &[ROOT_ID.to_string()],
        PullOptions::default(),
    );
    while let Some(delta) = pull.next_wave(&reader).await.unwrap() {
        fold_delta(&reader, &delta);
    }

    let s = reader.read();
    assert_eq!(s.thought("t1").unwrap().value, "call the plumber");
    assert_eq!(s.thought("t1").unwrap().parent_id.as_deref(), Some("inbox"));
    assert!(s.lexeme_for("call the plumber").unwrap().contexts.contains("t1"));
}

#[tokio::test]
async fn test_lexeme_deletes_persist() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(SledProvider::open(temp.path(), SCHEMA).unwrap());
    let push = PushEngine::new(
        Some(provider.clone()),
        None,
        Duration::from_millis(0),
        SCHEMA,
    );
    let mut store = TreeStore::new("laptop");

    push.enqueue(store.create("a", ROOT_ID, "ephemeral", 0.0).unwrap());
    push.flush(&store).await.unwrap();
    push.enqueue(store.delete_subtree("a").unwrap());
    push.flush(&store).await.unwrap();

    let lexemes = provider
        .get_lexemes_by_ids(&[grove::text::lexeme_key("ephemeral")])
        .await
        .unwrap();
    assert!(lexemes[0].is_none());
    let thoughts = provider.get_thoughts_by_ids(&["a".to_string()]).await.unwrap();
    assert!(thoughts[0].is_none());
}
