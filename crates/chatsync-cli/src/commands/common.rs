use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chatsync_core::models::{
    ChatListDelta, ChatPreview, Message, Settings, SyncStatus, Timestamp, UserId,
};
use chatsync_core::remote::{PushResponse, RemoteResult, RemoteSetting, SettingPush};
use chatsync_core::{
    ConsistencyFacade, HttpRemoteSyncClient, RemoteError, RemoteSyncClient, SqliteReplicaStore,
    SyncConfig,
};
use chrono::Utc;
use serde::Serialize;

use crate::error::CliError;

pub type Facade = ConsistencyFacade<SqliteReplicaStore, Remote>;

/// Remote used by the CLI; `Offline` when no server is configured
pub enum Remote {
    Http(HttpRemoteSyncClient),
    Offline,
}

impl RemoteSyncClient for Remote {
    async fn fetch_chat_deltas(&self, since: Option<Timestamp>) -> RemoteResult<ChatListDelta> {
        match self {
            Self::Http(client) => client.fetch_chat_deltas(since).await,
            Self::Offline => Err(RemoteError::NetworkNotAvailable),
        }
    }

    async fn fetch_settings(&self, user_id: UserId) -> RemoteResult<Vec<RemoteSetting>> {
        match self {
            Self::Http(client) => client.fetch_settings(user_id).await,
            Self::Offline => Err(RemoteError::NetworkNotAvailable),
        }
    }

    async fn push_setting(&self, push: SettingPush) -> RemoteResult<PushResponse> {
        match self {
            Self::Http(client) => client.push_setting(push).await,
            Self::Offline => Err(RemoteError::NetworkNotAvailable),
        }
    }
}

/// Global flags after env and default resolution
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub user: Option<String>,
}

impl GlobalOptions {
    pub fn resolve(
        db_path: Option<PathBuf>,
        config_path: Option<PathBuf>,
        user: Option<String>,
    ) -> Self {
        Self {
            db_path: resolve_db_path(db_path),
            config_path: resolve_config_path(config_path),
            user: user.or_else(|| env::var("CHATSYNC_USER").ok()),
        }
    }
}

#[derive(Clone, Copy)]
pub enum OpenMode {
    Local,
    RequireRemote,
}

impl OpenMode {
    const fn requires_remote(self) -> bool {
        matches!(self, Self::RequireRemote)
    }
}

pub async fn open_facade(options: &GlobalOptions, mode: OpenMode) -> Result<Facade, CliError> {
    let config = SyncConfig::load(options.config_path.as_deref())?;
    let user_id = parse_user(options.user.as_deref())?;

    let remote = if config.is_remote_configured() {
        Remote::Http(HttpRemoteSyncClient::new(&config)?)
    } else if mode.requires_remote() {
        return Err(CliError::SyncNotConfigured);
    } else {
        Remote::Offline
    };

    let store = SqliteReplicaStore::open(&options.db_path).await?;
    tracing::debug!(db_path = %options.db_path.display(), %user_id, "Opened local replica");
    Ok(ConsistencyFacade::new(
        user_id,
        Arc::new(store),
        Arc::new(remote),
        config,
    ))
}

pub fn parse_user(user: Option<&str>) -> Result<UserId, CliError> {
    let user = user
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .ok_or(CliError::MissingUser)?;
    user.parse::<UserId>()
        .map_err(|_| CliError::InvalidUser(user.to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CHATSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatsync")
        .join("chatsync.db")
}

/// Explicit path, then `CHATSYNC_CONFIG`, then the default file if present
pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_config_path
        .or_else(|| env::var_os("CHATSYNC_CONFIG").map(PathBuf::from))
        .or_else(|| default_config_path().filter(|path| path.is_file()))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chatsync").join("config.json"))
}

// -- output -------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SettingListItem {
    pub key: String,
    pub value: String,
    pub sync_status: SyncStatus,
}

pub fn settings_to_items(settings: &Settings) -> Vec<SettingListItem> {
    settings
        .entries
        .iter()
        .map(|(key, entry)| SettingListItem {
            key: key.to_string(),
            value: entry.value.clone(),
            sync_status: entry.sync_status,
        })
        .collect()
}

pub fn format_setting_lines(settings: &Settings) -> Vec<String> {
    settings
        .entries
        .iter()
        .map(|(key, entry)| {
            format!(
                "{:<24}  {:<8}  {}",
                key.as_str(),
                entry.sync_status.as_str(),
                entry.value
            )
        })
        .collect()
}

pub fn format_chat_lines(chats: &[ChatPreview]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    chats
        .iter()
        .map(|chat| {
            let id = chat.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let name = text_preview(&chat.name, 24);
            let activity = chat
                .last_activity_at
                .map_or_else(String::new, |at| format_relative_time(at.as_millis(), now_ms));
            let last = chat
                .last_message
                .as_ref()
                .map(|message| text_preview(&message.text, 40))
                .unwrap_or_default();

            if chat.unread_messages_count == 0 {
                format!("{short_id:<13}  {name:<24}  {activity:<10}  {last}")
            } else {
                format!(
                    "{short_id:<13}  {name:<24}  {activity:<10}  {last}  ({} unread)",
                    chat.unread_messages_count
                )
            }
        })
        .collect()
}

pub fn format_message_lines(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| {
            let status = message
                .delivery_status
                .map_or_else(|| "-".to_string(), |status| status.to_string());
            format!(
                "{}  {:<14}  {}",
                format_timestamp(message.created_at),
                status,
                message.text
            )
        })
        .collect()
}

pub fn text_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp: Timestamp) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp.as_millis()).map_or_else(
        || timestamp.as_millis().to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
