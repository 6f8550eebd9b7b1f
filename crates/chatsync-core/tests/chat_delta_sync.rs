mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatsync_core::models::{
    ChatDelta, ChatListDelta, StreamSyncStatus, Timestamp, CHAT_LIST_STREAM,
};
use chatsync_core::remote::RemoteSyncClient;
use chatsync_core::sync::{ChatDeltaSyncEngine, SyncOutcome};
use chatsync_core::{LocalReplicaStore, RemoteError, SqliteReplicaStore};
use common::{memory_store, test_config, FakeRemote};
use pretty_assertions::assert_eq;

type Engine = ChatDeltaSyncEngine<SqliteReplicaStore, FakeRemote>;

async fn engine(remote: &Arc<FakeRemote>) -> (Engine, Arc<SqliteReplicaStore>) {
    let store = memory_store().await;
    let engine = ChatDeltaSyncEngine::new(Arc::clone(&store), Arc::clone(remote), &test_config());
    (engine, store)
}

async fn chat_names(store: &SqliteReplicaStore) -> Vec<String> {
    let mut names: Vec<String> = store
        .chat_previews()
        .await
        .unwrap()
        .into_iter()
        .map(|preview| preview.name)
        .collect();
    names.sort();
    names
}

async fn cursor(store: &SqliteReplicaStore) -> Option<Timestamp> {
    store
        .sync_metadata(CHAT_LIST_STREAM)
        .await
        .unwrap()
        .last_sync_timestamp
}

#[tokio::test(flavor = "multi_thread")]
async fn first_sync_pulls_full_snapshot() {
    let remote = FakeRemote::new();
    remote.create_chat("Family");
    remote.create_chat("Work");
    let (engine, store) = engine(&remote).await;

    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(chat_names(&store).await, vec!["Family", "Work"]);

    let metadata = store.sync_metadata(CHAT_LIST_STREAM).await.unwrap();
    assert_eq!(metadata.sync_status, StreamSyncStatus::Idle);
    assert!(metadata.last_sync_timestamp.is_some());
    assert_eq!(metadata.last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_sync_applies_updates_and_deletes() {
    let remote = FakeRemote::new();
    let family = remote.create_chat("Family");
    let work = remote.create_chat("Work");
    let (engine, store) = engine(&remote).await;
    engine.sync().await;

    remote.rename_chat(family, "Family & Friends");
    remote.delete_chat(work);
    remote.create_chat("Book club");
    assert_eq!(engine.sync().await, SyncOutcome::Success);

    assert_eq!(
        chat_names(&store).await,
        vec!["Book club", "Family & Friends"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_follows_server_after_data_reset() {
    let remote = FakeRemote::new();
    remote.create_chat("Establishing Chat");
    let (engine, store) = engine(&remote).await;

    assert_eq!(engine.sync().await, SyncOutcome::Success);
    let before_reset = cursor(&store).await.unwrap();
    assert_eq!(chat_names(&store).await, vec!["Establishing Chat"]);

    remote.clear();
    remote.create_chat("Post-Clear Chat 1");
    remote.create_chat("Post-Clear Chat 2");

    // The server answers an old cursor with everything it has now
    let delta = remote.fetch_chat_deltas(Some(before_reset)).await.unwrap();
    let names: Vec<&str> = delta
        .changes
        .iter()
        .filter_map(|change| match change {
            ChatDelta::Created { metadata, .. } => Some(metadata.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec!["Post-Clear Chat 1", "Post-Clear Chat 2"]);
    assert!(delta.to_timestamp < before_reset);

    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(
        chat_names(&store).await,
        vec!["Post-Clear Chat 1", "Post-Clear Chat 2"]
    );
    let after_reset = cursor(&store).await.unwrap();
    assert_eq!(after_reset, delta.to_timestamp);
    assert!(after_reset < before_reset);

    // Later changes are picked up from the smaller cursor
    remote.create_chat("Post-Clear Chat 3");
    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(chat_names(&store).await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn applying_the_same_delta_twice_is_idempotent() {
    let remote = FakeRemote::new();
    remote.create_chat("Family");
    remote.create_chat("Work");
    let store = memory_store().await;
    let delta: ChatListDelta = remote.fetch_chat_deltas(None).await.unwrap();

    store
        .apply_chat_delta(CHAT_LIST_STREAM, delta.clone(), None)
        .await
        .unwrap();
    let once = store.chat_previews().await.unwrap();
    store
        .apply_chat_delta(CHAT_LIST_STREAM, delta, None)
        .await
        .unwrap();
    let twice = store.chat_previews().await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrently_created_chats_appear_exactly_once() {
    let remote = FakeRemote::new();
    let mut tasks = Vec::new();
    for index in 0..8u64 {
        let remote = Arc::clone(&remote);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(index * 5)).await;
            remote.create_chat(&format!("Chat {index}"))
        }));
    }

    // Accumulate the delta stream while chats are being created
    let mut seen = HashMap::new();
    let mut since = None;
    loop {
        let delta = remote.fetch_chat_deltas(since).await.unwrap();
        for change in &delta.changes {
            if let ChatDelta::Created { chat_id, .. } = change {
                *seen.entry(*chat_id).or_insert(0) += 1;
            }
        }
        since = Some(delta.to_timestamp);
        if tasks.iter().all(tokio::task::JoinHandle::is_finished) && !delta.has_more_changes {
            let delta = remote.fetch_chat_deltas(since).await.unwrap();
            for change in &delta.changes {
                if let ChatDelta::Created { chat_id, .. } = change {
                    *seen.entry(*chat_id).or_insert(0) += 1;
                }
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let mut created = Vec::new();
    for task in tasks {
        created.push(task.await.unwrap());
    }
    assert_eq!(seen.len(), 8);
    for id in created {
        assert_eq!(seen.get(&id), Some(&1));
    }

    let (engine, store) = engine(&remote).await;
    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(store.chat_previews().await.unwrap().len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_fetch_leaves_cursor_and_cache() {
    let remote = FakeRemote::new();
    remote.create_chat("Family");
    let (engine, store) = engine(&remote).await;
    engine.sync().await;
    let before = cursor(&store).await;

    remote.create_chat("Work");
    remote.fail_fetches(Some(RemoteError::ServerError));
    assert_eq!(engine.sync().await, SyncOutcome::Retry);

    let metadata = store.sync_metadata(CHAT_LIST_STREAM).await.unwrap();
    assert_eq!(metadata.last_sync_timestamp, before);
    assert_eq!(metadata.sync_status, StreamSyncStatus::Error);
    assert!(metadata.last_error.is_some());
    assert_eq!(chat_names(&store).await, vec!["Family"]);

    remote.fail_fetches(None);
    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(chat_names(&store).await, vec!["Family", "Work"]);
    let metadata = store.sync_metadata(CHAT_LIST_STREAM).await.unwrap();
    assert_eq!(metadata.sync_status, StreamSyncStatus::Idle);
    assert_eq!(metadata.last_error, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_fetch_is_permanent() {
    let remote = FakeRemote::new();
    remote.fail_fetches(Some(RemoteError::Unauthorized));
    let (engine, _store) = engine(&remote).await;

    assert_eq!(engine.sync().await, SyncOutcome::Failure);
}

#[tokio::test(flavor = "multi_thread")]
async fn paged_deltas_are_drained_in_one_cycle() {
    let remote = FakeRemote::with_page_size(2);
    for index in 0..5 {
        remote.create_chat(&format!("Chat {index}"));
    }
    let (engine, store) = engine(&remote).await;

    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(store.chat_previews().await.unwrap().len(), 5);
    assert_eq!(remote.fetches(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn page_limit_asks_for_retry() {
    let remote = FakeRemote::with_page_size(1);
    for index in 0..3 {
        remote.create_chat(&format!("Chat {index}"));
    }
    let store = memory_store().await;
    let engine = ChatDeltaSyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&remote),
        &test_config().with_max_delta_batches(2),
    );

    assert_eq!(engine.sync().await, SyncOutcome::Retry);
    assert_eq!(store.chat_previews().await.unwrap().len(), 2);

    assert_eq!(engine.sync().await, SyncOutcome::Success);
    assert_eq!(store.chat_previews().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_survives_store_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replica.db");
    let remote = FakeRemote::new();
    remote.create_chat("Family");

    let stored = {
        let store = Arc::new(SqliteReplicaStore::open(&path).await.unwrap());
        let engine = ChatDeltaSyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            &test_config(),
        );
        engine.sync().await;
        cursor(&store).await
    };
    assert!(stored.is_some());

    let reopened = SqliteReplicaStore::open(&path).await.unwrap();
    assert_eq!(cursor(&reopened).await, stored);
    assert_eq!(chat_names(&reopened).await, vec!["Family"]);
}
