//! Cursor-based incremental chat list sync

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::SyncOutcome;
use crate::config::SyncConfig;
use crate::db::LocalReplicaStore;
use crate::error::Result;
use crate::models::{ChatDelta, ChatId, ChatListDelta, Timestamp, CHAT_LIST_STREAM};
use crate::remote::{RemoteResult, RemoteSyncClient};

/// Progress of one sync cycle
enum Cycle {
    /// Server reported no further changes
    Drained,
    /// Page limit hit while the server still had changes
    Truncated,
}

/// Pulls chat list deltas and applies them to the local replica.
///
/// Cycles are serialized: a second `sync` waits for the running one and then
/// starts from the cursor it stored.
pub struct ChatDeltaSyncEngine<S, R> {
    store: Arc<S>,
    remote: Arc<R>,
    stream_lock: Arc<Mutex<()>>,
    max_batches: usize,
}

impl<S, R> Clone for ChatDeltaSyncEngine<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
            stream_lock: Arc::clone(&self.stream_lock),
            max_batches: self.max_batches,
        }
    }
}

impl<S: LocalReplicaStore, R: RemoteSyncClient> ChatDeltaSyncEngine<S, R> {
    /// Create an engine
    pub fn new(store: Arc<S>, remote: Arc<R>, config: &SyncConfig) -> Self {
        Self {
            store,
            remote,
            stream_lock: Arc::new(Mutex::new(())),
            max_batches: config.max_delta_batches.max(1),
        }
    }

    /// Fetch one page of changes after `cursor` (full snapshot for `None`)
    pub async fn request_delta(&self, cursor: Option<Timestamp>) -> RemoteResult<ChatListDelta> {
        self.remote.fetch_chat_deltas(cursor).await
    }

    /// Run one fetch/apply cycle.
    ///
    /// On failure the stored cursor is left as it was and the stream is
    /// marked `Error`; the local cache keeps its last good state.
    pub async fn sync(&self) -> SyncOutcome {
        let _stream = self.stream_lock.lock().await;

        match self.run_cycle().await {
            Ok(Cycle::Drained) => SyncOutcome::Success,
            Ok(Cycle::Truncated) => {
                tracing::info!(
                    max_batches = self.max_batches,
                    "Chat sync stopped at page limit"
                );
                SyncOutcome::Retry
            }
            Err(error) => {
                tracing::warn!(%error, "Chat sync failed");
                if let Err(record_error) = self
                    .store
                    .record_stream_error(CHAT_LIST_STREAM, error.to_string())
                    .await
                {
                    tracing::warn!(error = %record_error, "Failed to record chat sync error");
                }
                SyncOutcome::from_error(&error)
            }
        }
    }

    async fn run_cycle(&self) -> Result<Cycle> {
        let metadata = self.store.sync_metadata(CHAT_LIST_STREAM).await?;
        self.store.mark_stream_in_progress(CHAT_LIST_STREAM).await?;

        let mut cursor = metadata.last_sync_timestamp;
        let mut snapshot: Option<HashSet<ChatId>> = None;

        for page in 1..=self.max_batches {
            let delta = self.request_delta(cursor).await?;
            if delta.is_full_resync() {
                snapshot = Some(HashSet::new());
            }
            if let Some(ids) = snapshot.as_mut() {
                ids.extend(
                    delta
                        .changes
                        .iter()
                        .filter(|change| !matches!(change, ChatDelta::Deleted { .. }))
                        .map(ChatDelta::chat_id),
                );
            }

            let has_more = delta.has_more_changes;
            let next_cursor = delta.to_timestamp;
            let changes = delta.changes.len();
            let retain_only = if has_more { None } else { snapshot.take() };

            // The cursor is replaced unconditionally, even when it moves back
            self.store
                .apply_chat_delta(CHAT_LIST_STREAM, delta, retain_only)
                .await?;
            tracing::debug!(
                page,
                changes,
                from = ?cursor,
                to = %next_cursor,
                "Applied chat delta page"
            );
            cursor = Some(next_cursor);

            if !has_more {
                return Ok(Cycle::Drained);
            }
        }
        Ok(Cycle::Truncated)
    }
}
