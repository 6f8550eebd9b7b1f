//! In-memory sync server shared by the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatsync_core::models::{
    ChatDelta, ChatId, ChatListDelta, ChatMetadata, SettingKey, Timestamp, UserId,
};
use chatsync_core::remote::{
    PushResponse, RemoteResult, RemoteSetting, RemoteSyncClient, SettingPush,
};
use chatsync_core::{RemoteError, SqliteReplicaStore, SyncConfig};
use tokio::sync::Semaphore;

/// Server clock at startup; far from epoch so a clear visibly moves it back
const INITIAL_CLOCK: i64 = 1_700_000_000_000;
/// Each server operation advances the clock by this much
const TICK: i64 = 1_000;

#[derive(Debug, Clone)]
pub struct ServerSetting {
    pub value: String,
    pub version: i64,
    pub modified_at: Timestamp,
}

struct ServerState {
    clock: i64,
    log: Vec<ChatDelta>,
    settings: HashMap<(UserId, SettingKey), ServerSetting>,
    fetch_error: Option<RemoteError>,
    push_error: Option<RemoteError>,
    page_size: usize,
}

impl ServerState {
    fn tick(&mut self) -> Timestamp {
        self.clock += TICK;
        Timestamp::from_millis(self.clock)
    }
}

/// Fake server with a logical clock, a chat change log and versioned settings
pub struct FakeRemote {
    state: Mutex<ServerState>,
    push_gate: Mutex<Option<Arc<Semaphore>>>,
    push_attempts: AtomicUsize,
    fetches: AtomicUsize,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            state: Mutex::new(ServerState {
                clock: INITIAL_CLOCK,
                log: Vec::new(),
                settings: HashMap::new(),
                fetch_error: None,
                push_error: None,
                page_size: usize::MAX,
            }),
            push_gate: Mutex::new(None),
            push_attempts: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_page_size(page_size: usize) -> Arc<Self> {
        let remote = Self::default();
        remote.state.lock().unwrap().page_size = page_size;
        Arc::new(remote)
    }

    /// Create a chat on the server; returns its id
    pub fn create_chat(&self, name: &str) -> ChatId {
        let mut state = self.state.lock().unwrap();
        let timestamp = state.tick();
        let chat_id = ChatId::new();
        state.log.push(ChatDelta::Created {
            chat_id,
            metadata: ChatMetadata {
                name: name.to_string(),
                last_activity_at: Some(timestamp),
                ..ChatMetadata::default()
            },
            initial_messages: Vec::new(),
            timestamp,
        });
        chat_id
    }

    pub fn rename_chat(&self, chat_id: ChatId, name: &str) {
        let mut state = self.state.lock().unwrap();
        let timestamp = state.tick();
        state.log.push(ChatDelta::Updated {
            chat_id,
            metadata: ChatMetadata {
                name: name.to_string(),
                last_activity_at: Some(timestamp),
                ..ChatMetadata::default()
            },
            messages_to_add: Vec::new(),
            messages_to_delete: Vec::new(),
            timestamp,
        });
    }

    pub fn delete_chat(&self, chat_id: ChatId) {
        let mut state = self.state.lock().unwrap();
        let timestamp = state.tick();
        state.log.retain(|change| change.chat_id() != chat_id);
        state.log.push(ChatDelta::Deleted { chat_id, timestamp });
    }

    /// Drop all server data and reset the clock toward epoch
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.log.clear();
        state.settings.clear();
        state.clock = 0;
    }

    /// Write a setting as another device would
    pub fn set_server_setting(&self, user_id: UserId, key: &SettingKey, value: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let modified_at = state.tick();
        let version = state
            .settings
            .get(&(user_id, key.clone()))
            .map_or(0, |setting| setting.version)
            + 1;
        state.settings.insert(
            (user_id, key.clone()),
            ServerSetting {
                value: value.to_string(),
                version,
                modified_at,
            },
        );
        version
    }

    pub fn server_setting(&self, user_id: UserId, key: &SettingKey) -> Option<ServerSetting> {
        self.state
            .lock()
            .unwrap()
            .settings
            .get(&(user_id, key.clone()))
            .cloned()
    }

    pub fn fail_fetches(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().fetch_error = error;
    }

    pub fn fail_pushes(&self, error: Option<RemoteError>) {
        self.state.lock().unwrap().push_error = error;
    }

    /// Make pushes wait until [`Self::open_pushes`]
    pub fn hold_pushes(&self) {
        *self.push_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_pushes(&self) {
        if let Some(gate) = self.push_gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    pub fn push_attempts(&self) -> usize {
        self.push_attempts.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn changes_since(&self, since: Option<Timestamp>) -> RemoteResult<ChatListDelta> {
        let state = self.state.lock().unwrap();
        if let Some(error) = state.fetch_error.clone() {
            return Err(error);
        }

        // A cursor ahead of the server clock means the server was reset
        let from = since.filter(|since| since.as_millis() <= state.clock);
        let mut pending: Vec<&ChatDelta> = state
            .log
            .iter()
            .filter(|change| from.map_or(true, |from| change.timestamp() > from))
            .filter(|change| from.is_some() || !matches!(change, ChatDelta::Deleted { .. }))
            .collect();
        let has_more_changes = pending.len() > state.page_size;
        pending.truncate(state.page_size);

        let to_timestamp = if has_more_changes {
            pending
                .last()
                .map_or(Timestamp::from_millis(state.clock), |change| {
                    change.timestamp()
                })
        } else {
            Timestamp::from_millis(state.clock)
        };
        Ok(ChatListDelta {
            from_timestamp: from,
            to_timestamp,
            changes: pending.into_iter().cloned().collect(),
            has_more_changes,
        })
    }
}

impl RemoteSyncClient for FakeRemote {
    async fn fetch_chat_deltas(&self, since: Option<Timestamp>) -> RemoteResult<ChatListDelta> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.changes_since(since)
    }

    async fn fetch_settings(&self, user_id: UserId) -> RemoteResult<Vec<RemoteSetting>> {
        tokio::task::yield_now().await;
        let state = self.state.lock().unwrap();
        if let Some(error) = state.fetch_error.clone() {
            return Err(error);
        }
        let mut settings: Vec<RemoteSetting> = state
            .settings
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .map(|((_, key), setting)| RemoteSetting {
                key: key.clone(),
                value: setting.value.clone(),
                server_version: setting.version,
            })
            .collect();
        settings.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(settings)
    }

    async fn push_setting(&self, push: SettingPush) -> RemoteResult<PushResponse> {
        self.push_attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.push_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.push_error.clone() {
            return Err(error);
        }
        let slot = (push.user_id, push.key.clone());
        if let Some(current) = state.settings.get(&slot) {
            if current.version != push.last_known_server_version {
                return Ok(PushResponse::Conflict {
                    server_value: current.value.clone(),
                    server_version: current.version,
                    server_modified_at: current.modified_at,
                });
            }
        }
        let modified_at = state.tick();
        let version = push.last_known_server_version + 1;
        state.settings.insert(
            slot,
            ServerSetting {
                value: push.value,
                version,
                modified_at,
            },
        );
        Ok(PushResponse::Accepted {
            server_version: version,
        })
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_settings_debounce(Duration::ZERO)
        .with_sync_intervals(Duration::from_millis(50), Duration::from_millis(50))
}

pub async fn memory_store() -> Arc<SqliteReplicaStore> {
    Arc::new(SqliteReplicaStore::open_in_memory().await.unwrap())
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
