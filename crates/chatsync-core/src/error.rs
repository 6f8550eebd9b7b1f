//! Error types for chatsync-core

use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::delivery::DeliveryStatusError;
use crate::models::{ChatId, MessageId, UserId};

/// Result type alias using chatsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the local replica store.
///
/// Transient variants may resolve on retry; structural variants require user
/// action (clearing local data, granting permissions).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalStorageError {
    /// Database is busy, locked, or hit a disk I/O hiccup
    #[error("local storage temporarily unavailable")]
    TemporarilyUnavailable,

    /// No space left to complete the write
    #[error("local storage is full")]
    StorageFull,

    /// Database file is corrupted
    #[error("local storage is corrupted")]
    Corrupted,

    /// Database only accepts reads
    #[error("local storage is read-only")]
    ReadOnly,

    /// Missing permissions on the database file
    #[error("access to local storage denied")]
    AccessDenied,

    /// Anything else, with the original cause for diagnostics
    #[error("unknown local storage error: {0}")]
    UnknownError(String),
}

impl LocalStorageError {
    /// Whether the failure may go away on its own.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::TemporarilyUnavailable | Self::StorageFull | Self::UnknownError(_) => true,
            Self::Corrupted | Self::ReadOnly | Self::AccessDenied => false,
        }
    }
}

impl From<rusqlite::Error> for LocalStorageError {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &error {
            match failure.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::FileLockingProtocolFailed => return Self::TemporarilyUnavailable,
                ErrorCode::DiskFull => return Self::StorageFull,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => return Self::Corrupted,
                ErrorCode::ReadOnly => return Self::ReadOnly,
                ErrorCode::PermissionDenied
                | ErrorCode::CannotOpen
                | ErrorCode::AuthorizationForStatementDenied => return Self::AccessDenied,
                _ => {}
            }
        }
        Self::UnknownError(error.to_string())
    }
}

/// Errors surfaced by the remote transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Device has no network connectivity
    #[error("network not available")]
    NetworkNotAvailable,

    /// Network is up but the server does not answer (DNS, connect, timeout)
    #[error("server unreachable")]
    ServerUnreachable,

    /// Server answered with a 5xx or an undecodable payload
    #[error("server error")]
    ServerError,

    /// Credentials missing, expired or rejected
    #[error("unauthorized")]
    Unauthorized,

    /// Client is throttled
    #[error("rate limit exceeded")]
    RateLimitExceeded(Option<Duration>),

    /// Unclassified failure
    #[error("unknown remote error: {0}")]
    Unknown(String),
}

impl RemoteError {
    /// Whether retrying later may succeed.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Unauthorized)
    }

    /// Whether the server cannot be reached at all, so further calls in the
    /// same batch are pointless.
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::NetworkNotAvailable | Self::ServerUnreachable)
    }
}

/// Errors that can occur in chatsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local replica error
    #[error("Local storage error: {0}")]
    Storage(#[from] LocalStorageError),

    /// Remote transport error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Rejected delivery status transition
    #[error("Invalid delivery status transition: {0}")]
    DeliveryStatus(#[from] DeliveryStatusError),

    /// Chat not found
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    /// Chat id already present
    #[error("Duplicate chat id: {0}")]
    DuplicateChatId(ChatId),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Setting not found
    #[error("Setting not found: {key} for user {user_id}")]
    SettingNotFound {
        /// Owner of the setting
        user_id: UserId,
        /// Setting key
        key: String,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn sqlite_codes_map_to_storage_taxonomy() {
        assert_eq!(
            LocalStorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY)),
            LocalStorageError::TemporarilyUnavailable
        );
        assert_eq!(
            LocalStorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_FULL)),
            LocalStorageError::StorageFull
        );
        assert_eq!(
            LocalStorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT)),
            LocalStorageError::Corrupted
        );
        assert_eq!(
            LocalStorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_READONLY)),
            LocalStorageError::ReadOnly
        );
        assert_eq!(
            LocalStorageError::from(sqlite_failure(rusqlite::ffi::SQLITE_PERM)),
            LocalStorageError::AccessDenied
        );
        assert!(matches!(
            LocalStorageError::from(rusqlite::Error::QueryReturnedNoRows),
            LocalStorageError::UnknownError(_)
        ));
    }

    #[test]
    fn structural_storage_errors_are_not_transient() {
        assert!(LocalStorageError::TemporarilyUnavailable.is_transient());
        assert!(LocalStorageError::StorageFull.is_transient());
        assert!(!LocalStorageError::Corrupted.is_transient());
        assert!(!LocalStorageError::ReadOnly.is_transient());
        assert!(!LocalStorageError::AccessDenied.is_transient());
    }

    #[test]
    fn only_unauthorized_is_permanent_remotely() {
        assert!(RemoteError::ServerError.is_transient());
        assert!(RemoteError::RateLimitExceeded(None).is_transient());
        assert!(!RemoteError::Unauthorized.is_transient());
        assert!(RemoteError::NetworkNotAvailable.is_unreachable());
        assert!(!RemoteError::ServerError.is_unreachable());
    }
}
