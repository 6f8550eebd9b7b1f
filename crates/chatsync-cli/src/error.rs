use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] chatsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No user selected. Pass --user <UUID> or set CHATSYNC_USER.")]
    MissingUser,
    #[error("Invalid user id: {0}")]
    InvalidUser(String),
    #[error("Invalid chat id: {0}")]
    InvalidChatId(String),
    #[error(
        "Sync is not configured. Set base_url in the config file or CHATSYNC_BASE_URL to enable `chatsync sync`."
    )]
    SyncNotConfigured,
}
