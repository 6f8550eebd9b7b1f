//! `SQLite` replica store

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::chat_repository::ChatRepository;
use super::migrations;
use super::settings_repository::SettingsRepository;
use super::sync_metadata_repository::SyncMetadataRepository;
use super::{LocalReplicaStore, Revision, SettingWrite};
use crate::delivery;
use crate::error::{Error, LocalStorageError, Result};
use crate::models::{
    Chat, ChatId, ChatListDelta, ChatPreview, DeliveryStatus, Message, MessageId, SettingKey,
    SettingRecord, StreamSyncStatus, SyncMetadata, UserId,
};

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Which revision counter a write bumps
#[derive(Debug, Clone, Copy)]
enum Table {
    Settings,
    Chats,
}

/// `LocalReplicaStore` backed by a single `SQLite` connection.
///
/// Statements run on tokio's blocking pool. A caller that stops awaiting
/// does not interrupt the statement, so writes are never left half-applied.
#[derive(Clone)]
pub struct SqliteReplicaStore {
    conn: Arc<Mutex<Connection>>,
    revision: Arc<watch::Sender<Revision>>,
}

impl SqliteReplicaStore {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LocalStorageError::UnknownError(e.to_string()))?;
        }
        let store = Self::from_connection(move || Connection::open(path)).await?;
        tracing::debug!("Opened replica store");
        Ok(store)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory).await
    }

    async fn from_connection<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let mut conn = open()?;
            configure(&conn)?;
            migrations::run(&mut conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| LocalStorageError::UnknownError(e.to_string()))??;

        let (revision, _) = watch::channel(Revision::default());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            revision: Arc::new(revision),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| LocalStorageError::UnknownError("connection lock poisoned".into()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LocalStorageError::UnknownError(e.to_string()))?
    }

    /// Like [`Self::with_conn`], bumping `table`'s revision after success
    async fn write<T, F>(&self, table: Table, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let value = self.with_conn(f).await?;
        self.bump(table);
        Ok(value)
    }

    fn bump(&self, table: Table) {
        self.revision.send_modify(|revision| match table {
            Table::Settings => revision.settings += 1,
            Table::Chats => revision.chats += 1,
        });
    }
}

/// Configure `SQLite` pragmas
fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // In-memory databases report "memory" instead of switching to WAL
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Parse a text column through `FromStr`
pub(super) fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| conversion_error(idx, Box::new(e)))
}

/// Parse a nullable text column through `FromStr`
pub(super) fn optional_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|text| text.parse().map_err(|e| conversion_error(idx, Box::new(e))))
        .transpose()
}

/// Decode a JSON text column
pub(super) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, Box::new(e)))
}

fn conversion_error(
    idx: usize,
    error: Box<dyn std::error::Error + Send + Sync + 'static>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, error)
}

impl LocalReplicaStore for SqliteReplicaStore {
    async fn setting(&self, user_id: UserId, key: SettingKey) -> Result<Option<SettingRecord>> {
        self.with_conn(move |conn| SettingsRepository::new(conn).get(user_id, &key))
            .await
    }

    async fn settings(&self, user_id: UserId) -> Result<Vec<SettingRecord>> {
        self.with_conn(move |conn| SettingsRepository::new(conn).list(user_id))
            .await
    }

    async fn pending_settings(&self, user_id: UserId) -> Result<Vec<SettingRecord>> {
        self.with_conn(move |conn| SettingsRepository::new(conn).list_pending(user_id))
            .await
    }

    async fn update_setting<T, F>(&self, user_id: UserId, key: SettingKey, update: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Option<SettingRecord>) -> Result<SettingWrite<T>> + Send + 'static,
    {
        self.write(Table::Settings, move |conn| {
            let tx = conn.transaction()?;
            let repo = SettingsRepository::new(&tx);
            let current = repo.get(user_id, &key)?;
            let (record, output) = update(current)?;
            if let Some(record) = record {
                repo.save(&record)?;
            }
            tx.commit()?;
            Ok(output)
        })
        .await
    }

    async fn seed_settings(&self, user_id: UserId, records: Vec<SettingRecord>) -> Result<bool> {
        self.write(Table::Settings, move |conn| {
            let tx = conn.transaction()?;
            let repo = SettingsRepository::new(&tx);
            if repo.has_any(user_id)? {
                return Ok(false);
            }
            for record in &records {
                repo.save(record)?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn chat(&self, id: ChatId) -> Result<Option<Chat>> {
        self.with_conn(move |conn| ChatRepository::new(conn).get(id))
            .await
    }

    async fn chat_previews(&self) -> Result<Vec<ChatPreview>> {
        self.with_conn(|conn| ChatRepository::new(conn).previews())
            .await
    }

    async fn insert_chat(&self, chat: Chat) -> Result<()> {
        self.write(Table::Chats, move |conn| {
            let tx = conn.transaction()?;
            ChatRepository::new(&tx).insert(&chat)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_message(&self, message: Message) -> Result<()> {
        self.write(Table::Chats, move |conn| {
            let tx = conn.transaction()?;
            ChatRepository::new(&tx).insert_message(&message)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_delivery_status(
        &self,
        id: MessageId,
        next: Option<DeliveryStatus>,
    ) -> Result<Message> {
        self.write(Table::Chats, move |conn| {
            let tx = conn.transaction()?;
            let repo = ChatRepository::new(&tx);
            let mut message = repo.message(id)?.ok_or(Error::MessageNotFound(id))?;
            delivery::validate(message.delivery_status.as_ref(), next.as_ref())?;
            repo.set_delivery_status(id, next.as_ref())?;
            tx.commit()?;
            message.delivery_status = next;
            Ok(message)
        })
        .await
    }

    async fn apply_chat_delta(
        &self,
        stream: &str,
        delta: ChatListDelta,
        retain_only: Option<HashSet<ChatId>>,
    ) -> Result<()> {
        let stream = stream.to_string();
        let stats = self
            .write(Table::Chats, move |conn| {
                let tx = conn.transaction()?;
                let chats = ChatRepository::new(&tx);
                let mut stats = chats.apply_delta(&delta)?;
                if let Some(keep) = &retain_only {
                    stats.pruned = chats.retain_only(keep)?;
                }
                SyncMetadataRepository::new(&tx).complete(&stream, delta.to_timestamp)?;
                tx.commit()?;
                Ok(stats)
            })
            .await?;
        tracing::debug!(
            applied = stats.applied,
            skipped = stats.skipped,
            pruned = stats.pruned,
            "Applied chat delta"
        );
        Ok(())
    }

    async fn sync_metadata(&self, stream: &str) -> Result<SyncMetadata> {
        let stream = stream.to_string();
        self.with_conn(move |conn| SyncMetadataRepository::new(conn).get(&stream))
            .await
    }

    async fn mark_stream_in_progress(&self, stream: &str) -> Result<()> {
        let stream = stream.to_string();
        self.with_conn(move |conn| {
            SyncMetadataRepository::new(conn).set_status(
                &stream,
                StreamSyncStatus::InProgress,
                None,
            )
        })
        .await
    }

    async fn record_stream_error(&self, stream: &str, error: String) -> Result<()> {
        let stream = stream.to_string();
        self.with_conn(move |conn| {
            SyncMetadataRepository::new(conn).set_status(
                &stream,
                StreamSyncStatus::Error,
                Some(&error),
            )
        })
        .await
    }

    fn subscribe(&self) -> watch::Receiver<Revision> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatDelta, ParticipantId, Timestamp, CHAT_LIST_STREAM};
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let store = SqliteReplicaStore::open_in_memory().await.unwrap();
        assert!(store.chat_previews().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_writes_bump_revision() {
        let store = SqliteReplicaStore::open_in_memory().await.unwrap();
        let rx = store.subscribe();

        store.insert_chat(Chat::new("Bump")).await.unwrap();

        assert_eq!(rx.borrow().chats, 1);
        assert_eq!(rx.borrow().settings, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_update_rolls_back() {
        let store = SqliteReplicaStore::open_in_memory().await.unwrap();
        let user = UserId::new();

        let result = store
            .update_setting(user, SettingKey::ui_language(), |_| -> Result<SettingWrite<()>> {
                Err(Error::InvalidInput("nope".into()))
            })
            .await;

        assert!(result.is_err());
        assert!(store.settings(user).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seed_only_fills_empty_settings() {
        let store = SqliteReplicaStore::open_in_memory().await.unwrap();
        let user = UserId::new();
        let now = Timestamp::now();
        let seed = vec![SettingRecord::recovered(
            user,
            SettingKey::ui_language(),
            "German".into(),
            3,
            now,
        )];

        assert!(store.seed_settings(user, seed.clone()).await.unwrap());
        assert_eq!(store.settings(user).await.unwrap(), seed);

        let theme = SettingKey::new("theme").unwrap();
        let second = vec![SettingRecord::new_local(user, theme.clone(), "dark".into(), now)];
        assert!(!store.seed_settings(user, second).await.unwrap());
        assert!(store.setting(user, theme).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_status_leaves_message_untouched() {
        let store = SqliteReplicaStore::open_in_memory().await.unwrap();
        let chat = Chat::new("Receipts");
        let message = Message::new(chat.id, ParticipantId::new(), "hello");
        store.insert_chat(chat.clone()).await.unwrap();
        store.insert_message(message.clone()).await.unwrap();

        store
            .update_delivery_status(message.id, Some(DeliveryStatus::Delivered))
            .await
            .unwrap();
        let result = store
            .update_delivery_status(message.id, Some(DeliveryStatus::Sending { progress: 5 }))
            .await;

        assert!(matches!(
            result,
            Err(Error::DeliveryStatus(
                delivery::DeliveryStatusError::CannotChangeFromDeliveredToSending
            ))
        ));
        let stored = store.chat(chat.id).await.unwrap().unwrap();
        assert_eq!(
            stored.messages[0].delivery_status,
            Some(DeliveryStatus::Delivered)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cursor_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("replica.db");
        let chat = Chat::new("Persistent");

        {
            let store = SqliteReplicaStore::open(&path).await.unwrap();
            let delta = ChatListDelta {
                from_timestamp: None,
                to_timestamp: Timestamp::from_millis(4_000),
                changes: vec![ChatDelta::Created {
                    chat_id: chat.id,
                    metadata: chat.metadata(),
                    initial_messages: Vec::new(),
                    timestamp: Timestamp::from_millis(4_000),
                }],
                has_more_changes: false,
            };
            store
                .apply_chat_delta(CHAT_LIST_STREAM, delta, None)
                .await
                .unwrap();
        }

        let store = SqliteReplicaStore::open(&path).await.unwrap();
        let metadata = store.sync_metadata(CHAT_LIST_STREAM).await.unwrap();
        assert_eq!(
            metadata.last_sync_timestamp,
            Some(Timestamp::from_millis(4_000))
        );
        assert_eq!(metadata.sync_status, StreamSyncStatus::Idle);
        assert!(store.chat(chat.id).await.unwrap().is_some());
    }
}
