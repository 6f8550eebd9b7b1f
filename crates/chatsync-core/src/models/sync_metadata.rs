//! Persisted state of a delta stream

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Timestamp;
use crate::error::{Error, Result};

/// Stream name of the chat list feed
pub const CHAT_LIST_STREAM: &str = "chat_list";

/// Progress of a delta stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSyncStatus {
    /// No sync running; last one succeeded or never ran
    #[default]
    Idle,
    /// A fetch/apply cycle is running
    InProgress,
    /// Last cycle failed, see `last_error`
    Error,
}

impl StreamSyncStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Error => "error",
        }
    }
}

impl FromStr for StreamSyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "in_progress" => Ok(Self::InProgress),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!(
                "unknown stream status: {other}"
            ))),
        }
    }
}

impl fmt::Display for StreamSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cursor and status of one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Stream name
    pub stream: String,
    /// Cursor of the last applied page
    pub last_sync_timestamp: Option<Timestamp>,
    /// Current status
    pub sync_status: StreamSyncStatus,
    /// Message of the last failure
    pub last_error: Option<String>,
    /// When this row last changed
    pub updated_at: Timestamp,
}

impl SyncMetadata {
    /// Metadata of a stream that never synced
    #[must_use]
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            last_sync_timestamp: None,
            sync_status: StreamSyncStatus::Idle,
            last_error: None,
            updated_at: Timestamp::EPOCH,
        }
    }
}
