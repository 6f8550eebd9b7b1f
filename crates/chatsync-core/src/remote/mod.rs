//! Remote sync service contract

mod http;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::models::{ChatListDelta, SettingKey, Timestamp, UserId};

pub use http::HttpRemoteSyncClient;

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A local setting value offered to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingPush {
    /// Owner
    pub user_id: UserId,
    /// Key
    pub key: SettingKey,
    /// Value to store
    pub value: String,
    /// Client's `local_version` at push time
    pub client_version: i64,
    /// Server version the edit was based on (0 = unknown)
    pub last_known_server_version: i64,
    /// Local modification time
    pub modified_at: Timestamp,
}

/// Server verdict on a pushed setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResponse {
    /// Stored; the server now holds this version
    Accepted {
        /// New server version
        server_version: i64,
    },
    /// Server holds a different value
    Conflict {
        /// Server's value
        server_value: String,
        /// Server's version
        server_version: i64,
        /// When the server value was written
        server_modified_at: Timestamp,
    },
}

/// A setting as backed up on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSetting {
    /// Key
    pub key: SettingKey,
    /// Stored value
    pub value: String,
    /// Server's version of the value
    pub server_version: i64,
}

/// Transport to the authoritative sync service.
pub trait RemoteSyncClient: Send + Sync + 'static {
    /// Fetch chat list changes after `since`, or a full snapshot for `None`
    fn fetch_chat_deltas(
        &self,
        since: Option<Timestamp>,
    ) -> impl Future<Output = RemoteResult<ChatListDelta>> + Send;

    /// Fetch a user's server-side settings backup
    fn fetch_settings(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = RemoteResult<Vec<RemoteSetting>>> + Send;

    /// Offer a local setting value
    fn push_setting(
        &self,
        push: SettingPush,
    ) -> impl Future<Output = RemoteResult<PushResponse>> + Send;
}
