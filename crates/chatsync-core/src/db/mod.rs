//! Local replica: durable keyed records behind an async store contract

mod chat_repository;
mod connection;
mod migrations;
mod settings_repository;
mod sync_metadata_repository;

use std::collections::HashSet;
use std::future::Future;

use tokio::sync::watch;

use crate::error::Result;
use crate::models::{
    Chat, ChatId, ChatListDelta, ChatPreview, DeliveryStatus, Message, MessageId, SettingKey,
    SettingRecord, SyncMetadata, UserId,
};

pub use connection::SqliteReplicaStore;

/// Per-table change counters, bumped after every committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Revision {
    /// Settings table revision
    pub settings: u64,
    /// Chats and messages revision
    pub chats: u64,
}

/// Outcome of a settings read-modify-write closure: the record to persist
/// (`None` leaves the row as it is) and a value handed back to the caller.
pub type SettingWrite<T> = (Option<SettingRecord>, T);

/// Durable local store the coordinators and the facade operate on.
///
/// Every method is atomic: it either commits completely or leaves the store
/// unchanged, including when the calling future is dropped.
pub trait LocalReplicaStore: Send + Sync + 'static {
    /// Read one setting
    fn setting(
        &self,
        user_id: UserId,
        key: SettingKey,
    ) -> impl Future<Output = Result<Option<SettingRecord>>> + Send;

    /// All settings of a user, ordered by key
    fn settings(&self, user_id: UserId) -> impl Future<Output = Result<Vec<SettingRecord>>> + Send;

    /// Settings with `local_version > synced_version`, ordered by key
    fn pending_settings(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<SettingRecord>>> + Send;

    /// Transactional read-modify-write of one setting
    fn update_setting<T, F>(
        &self,
        user_id: UserId,
        key: SettingKey,
        update: F,
    ) -> impl Future<Output = Result<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(Option<SettingRecord>) -> Result<SettingWrite<T>> + Send + 'static;

    /// Store a full set of records for a user that has none.
    ///
    /// Returns `false` and writes nothing when any record already exists, so
    /// a local edit racing with recovery is never overwritten.
    fn seed_settings(
        &self,
        user_id: UserId,
        records: Vec<SettingRecord>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Chat with its messages
    fn chat(&self, id: ChatId) -> impl Future<Output = Result<Option<Chat>>> + Send;

    /// Chat list, most recently active first
    fn chat_previews(&self) -> impl Future<Output = Result<Vec<ChatPreview>>> + Send;

    /// Insert a new chat, failing with `DuplicateChatId` if it exists
    fn insert_chat(&self, chat: Chat) -> impl Future<Output = Result<()>> + Send;

    /// Insert a message into an existing chat, failing with `ChatNotFound`
    fn insert_message(&self, message: Message) -> impl Future<Output = Result<()>> + Send;

    /// Change a message's delivery status if the transition is legal
    fn update_delivery_status(
        &self,
        id: MessageId,
        next: Option<DeliveryStatus>,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Apply one page of chat changes and store its cursor in one transaction.
    ///
    /// When `retain_only` is set, server-known chats outside it are removed
    /// afterwards; chats created on this device are kept.
    fn apply_chat_delta(
        &self,
        stream: &str,
        delta: ChatListDelta,
        retain_only: Option<HashSet<ChatId>>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Cursor and status of a stream
    fn sync_metadata(&self, stream: &str) -> impl Future<Output = Result<SyncMetadata>> + Send;

    /// Mark a stream as running
    fn mark_stream_in_progress(&self, stream: &str) -> impl Future<Output = Result<()>> + Send;

    /// Record a failed cycle, leaving the cursor untouched
    fn record_stream_error(
        &self,
        stream: &str,
        error: String,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Revision watch for reactive reads
    fn subscribe(&self) -> watch::Receiver<Revision>;
}
