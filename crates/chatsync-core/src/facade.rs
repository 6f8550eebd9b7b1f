//! Single entry point for reads, optimistic writes and sync triggers

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::conflict::{ConflictResolver, ServerWins};
use crate::config::SyncConfig;
use crate::db::{LocalReplicaStore, Revision};
use crate::error::{Error, LocalStorageError, Result};
use crate::models::{
    Chat, ChatId, ChatPreview, DeliveryStatus, Message, MessageId, SettingKey, SettingRecord,
    Settings, SettingsConflictEvent, UiLanguage, UserId,
};
use crate::remote::RemoteSyncClient;
use crate::sync::{
    ChatDeltaSyncEngine, InFlightSettings, SettingsSyncCoordinator, SyncOutcome, SyncScheduler,
};

/// A unit of sync work, so external schedulers can describe jobs as data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum SyncJob {
    /// Push one setting
    SyncSetting {
        /// Owner
        user_id: UserId,
        /// Key
        key: SettingKey,
    },
    /// Push every dirty setting of a user
    SyncPendingSettings {
        /// Owner
        user_id: UserId,
    },
    /// Pull chat list changes
    SyncChatDeltas,
    /// Restore settings from the server backup if none are stored
    RecoverSettings {
        /// Owner
        user_id: UserId,
    },
}

/// A read that can be re-run whenever its table changes
pub trait ReplicaQuery: Send + Sync + 'static {
    /// Value produced by the query
    type Output: Send;

    /// Revision counter of the table this query reads
    fn revision(revision: &Revision) -> u64;

    /// Run the query
    fn load<S: LocalReplicaStore>(
        &self,
        store: &S,
    ) -> impl Future<Output = Result<Self::Output>> + Send;
}

/// Settings of one user, with running pushes shown as `Syncing`
#[derive(Debug, Clone)]
pub struct SettingsQuery {
    /// Owner
    pub user_id: UserId,
    /// Keys with a push in flight
    pub in_flight: InFlightSettings,
}

impl ReplicaQuery for SettingsQuery {
    type Output = Settings;

    fn revision(revision: &Revision) -> u64 {
        revision.settings
    }

    async fn load<S: LocalReplicaStore>(&self, store: &S) -> Result<Settings> {
        let records = store.settings(self.user_id).await?;
        let mut settings = Settings::from_records(self.user_id, &records);
        self.in_flight.mark(&mut settings);
        Ok(settings)
    }
}

/// The chat list
#[derive(Debug, Clone, Copy)]
pub struct ChatListQuery;

impl ReplicaQuery for ChatListQuery {
    type Output = Vec<ChatPreview>;

    fn revision(revision: &Revision) -> u64 {
        revision.chats
    }

    async fn load<S: LocalReplicaStore>(&self, store: &S) -> Result<Vec<ChatPreview>> {
        store.chat_previews().await
    }
}

/// One chat; `None` once it is deleted
#[derive(Debug, Clone, Copy)]
pub struct ChatQuery {
    /// Chat
    pub chat_id: ChatId,
}

impl ReplicaQuery for ChatQuery {
    type Output = Option<Chat>;

    fn revision(revision: &Revision) -> u64 {
        revision.chats
    }

    async fn load<S: LocalReplicaStore>(&self, store: &S) -> Result<Option<Chat>> {
        store.chat(self.chat_id).await
    }
}

/// Stream of query results: the current value first, then a fresh value
/// after every committed change to the query's table.
pub struct Observer<S, Q> {
    store: Arc<S>,
    query: Q,
    revisions: watch::Receiver<Revision>,
    last: Option<u64>,
}

impl<S: LocalReplicaStore, Q: ReplicaQuery> Observer<S, Q> {
    fn new(store: Arc<S>, query: Q) -> Self {
        let revisions = store.subscribe();
        Self {
            store,
            query,
            revisions,
            last: None,
        }
    }

    /// Wait for the next value
    pub async fn next(&mut self) -> Result<Q::Output> {
        if let Some(last) = self.last {
            self.revisions
                .wait_for(|revision| Q::revision(revision) != last)
                .await
                .map_err(|_| LocalStorageError::UnknownError("replica store closed".into()))?;
        }
        let revision = Q::revision(&self.revisions.borrow_and_update());
        self.last = Some(revision);
        self.query.load(self.store.as_ref()).await
    }
}

/// Merges optimistic local state with confirmed server state.
///
/// Reads come from the local replica only; writes land there first and are
/// pushed by the coordinators, on demand or from the scheduler.
pub struct ConsistencyFacade<S, R> {
    user_id: UserId,
    store: Arc<S>,
    settings_sync: SettingsSyncCoordinator<S, R>,
    chat_sync: ChatDeltaSyncEngine<S, R>,
    scheduler: SyncScheduler,
    config: SyncConfig,
}

impl<S: LocalReplicaStore, R: RemoteSyncClient> ConsistencyFacade<S, R> {
    /// Create a facade for `user_id` with server-wins conflict resolution
    pub fn new(user_id: UserId, store: Arc<S>, remote: Arc<R>, config: SyncConfig) -> Self {
        Self::with_resolver(user_id, store, remote, Arc::new(ServerWins), config)
    }

    /// Create a facade with a custom conflict resolver
    pub fn with_resolver(
        user_id: UserId,
        store: Arc<S>,
        remote: Arc<R>,
        resolver: Arc<dyn ConflictResolver>,
        config: SyncConfig,
    ) -> Self {
        let scheduler = SyncScheduler::new(config.worker_pool_size);
        let settings_sync = SettingsSyncCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            resolver,
            scheduler.clone(),
            &config,
        );
        let chat_sync = ChatDeltaSyncEngine::new(Arc::clone(&store), remote, &config);
        Self {
            user_id,
            store,
            settings_sync,
            chat_sync,
            scheduler,
            config,
        }
    }

    /// Signed-in user
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Underlying replica store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Task scope used for triggered and periodic sync
    pub const fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Resolved settings conflicts, for observability
    pub fn subscribe_conflicts(&self) -> broadcast::Receiver<SettingsConflictEvent> {
        self.settings_sync.subscribe_conflicts()
    }

    // -- reads --------------------------------------------------------------

    /// Current settings, including pending local edits
    pub async fn settings(&self) -> Result<Settings> {
        self.settings_query().load(self.store.as_ref()).await
    }

    /// Current chat list
    pub async fn chat_list(&self) -> Result<Vec<ChatPreview>> {
        self.store.chat_previews().await
    }

    /// One chat with its messages
    pub async fn chat(&self, id: ChatId) -> Result<Chat> {
        self.store.chat(id).await?.ok_or(Error::ChatNotFound(id))
    }

    /// Settings now and after every change
    pub fn observe_settings(&self) -> Observer<S, SettingsQuery> {
        Observer::new(Arc::clone(&self.store), self.settings_query())
    }

    fn settings_query(&self) -> SettingsQuery {
        SettingsQuery {
            user_id: self.user_id,
            in_flight: self.settings_sync.in_flight(),
        }
    }

    /// Chat list now and after every change
    pub fn observe_chat_list(&self) -> Observer<S, ChatListQuery> {
        Observer::new(Arc::clone(&self.store), ChatListQuery)
    }

    /// One chat now and after every change
    pub fn observe_chat(&self, chat_id: ChatId) -> Observer<S, ChatQuery> {
        Observer::new(Arc::clone(&self.store), ChatQuery { chat_id })
    }

    // -- writes -------------------------------------------------------------

    /// Change a setting locally and schedule its push
    pub async fn update_setting(
        &self,
        key: SettingKey,
        value: impl Into<String>,
    ) -> Result<SettingRecord> {
        self.settings_sync
            .upsert_local(self.user_id, key, value)
            .await
    }

    /// Change the interface language
    pub async fn update_ui_language(&self, language: UiLanguage) -> Result<SettingRecord> {
        self.update_setting(SettingKey::ui_language(), language.as_str())
            .await
    }

    /// Add a chat created on this device
    pub async fn add_local_chat(&self, chat: Chat) -> Result<()> {
        let id = chat.id;
        self.store.insert_chat(chat).await?;
        tracing::debug!(chat_id = %id, "Added local chat");
        Ok(())
    }

    /// Add a message written on this device
    pub async fn add_local_message(&self, message: Message) -> Result<()> {
        let (id, chat_id) = (message.id, message.chat_id);
        self.store.insert_message(message).await?;
        tracing::debug!(message_id = %id, %chat_id, "Added local message");
        Ok(())
    }

    /// Move a message to a new delivery status if the transition is legal
    pub async fn apply_delivery_status(
        &self,
        id: MessageId,
        next: Option<DeliveryStatus>,
    ) -> Result<Message> {
        let result = self.store.update_delivery_status(id, next).await;
        if let Err(Error::DeliveryStatus(error)) = &result {
            tracing::debug!(message_id = %id, %error, "Rejected delivery status update");
        }
        result
    }

    // -- triggers -----------------------------------------------------------

    /// Sync the chat list in the foreground; `false` if the scheduler refused
    pub fn request_chat_sync(&self) -> bool {
        let engine = self.chat_sync.clone();
        self.scheduler.spawn_foreground("chat_sync", async move {
            engine.sync().await;
        })
    }

    /// Start the scheduler and the periodic background jobs
    pub fn start(&self) -> bool {
        if !self.scheduler.start() {
            return false;
        }

        let engine = self.chat_sync.clone();
        self.scheduler
            .spawn_periodic("chat_sync", self.config.chat_sync_interval, move || {
                let engine = engine.clone();
                async move { engine.sync().await }
            });

        let settings = self.settings_sync.clone();
        let user_id = self.user_id;
        self.scheduler.spawn_periodic(
            "pending_settings_sync",
            self.config.settings_sync_interval,
            move || {
                let settings = settings.clone();
                async move { settings.sync_all_pending(user_id).await }
            },
        );
        tracing::info!(%user_id, "Consistency layer started");
        true
    }

    /// Cancel user-triggered work (e.g. on app teardown)
    pub fn cancel_foreground(&self) {
        self.scheduler.cancel_foreground();
    }

    /// Stop all sync work
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        tracing::info!(user_id = %self.user_id, "Consistency layer stopped");
    }

    // -- background job surface ---------------------------------------------

    /// Push one setting now
    pub async fn sync_one_setting(&self, user_id: UserId, key: SettingKey) -> SyncOutcome {
        self.settings_sync.sync_one(user_id, key).await
    }

    /// Push all dirty settings of a user now
    pub async fn sync_all_pending_settings(&self, user_id: UserId) -> SyncOutcome {
        self.settings_sync.sync_all_pending(user_id).await
    }

    /// Restore settings from the server backup if none are stored locally.
    ///
    /// Falls back to the built-in defaults when the backup is empty or
    /// unreachable. Returns the settings as stored afterwards.
    pub async fn recover_settings(&self) -> Result<Settings> {
        if self.settings_sync.recover(self.user_id).await? {
            tracing::info!(user_id = %self.user_id, "Settings initialised");
        }
        self.settings().await
    }

    /// Pull chat list changes now
    pub async fn sync_chat_deltas(&self) -> SyncOutcome {
        self.chat_sync.sync().await
    }

    /// Run a job described as data
    pub async fn run_job(&self, job: SyncJob) -> SyncOutcome {
        tracing::debug!(?job, "Running sync job");
        match job {
            SyncJob::SyncSetting { user_id, key } => self.sync_one_setting(user_id, key).await,
            SyncJob::SyncPendingSettings { user_id } => {
                self.sync_all_pending_settings(user_id).await
            }
            SyncJob::SyncChatDeltas => self.sync_chat_deltas().await,
            SyncJob::RecoverSettings { user_id } => {
                match self.settings_sync.recover(user_id).await {
                    Ok(_) => SyncOutcome::Success,
                    Err(error) => {
                        tracing::warn!(%user_id, %error, "Settings recovery failed");
                        SyncOutcome::from_error(&error)
                    }
                }
            }
        }
    }
}
