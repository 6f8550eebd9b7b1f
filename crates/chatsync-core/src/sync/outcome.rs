//! Tri-state result of a sync job

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, LocalStorageError, RemoteError};

/// What the caller (usually an external scheduler) should do next.
///
/// Variants are ordered by severity: `Success < Retry < Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Done, nothing left to do
    Success,
    /// Transient failure; try again later
    Retry,
    /// Permanent failure; retrying will not help
    Failure,
}

impl SyncOutcome {
    /// Classify a local storage error
    pub const fn from_storage(error: &LocalStorageError) -> Self {
        if error.is_transient() {
            Self::Retry
        } else {
            Self::Failure
        }
    }

    /// Classify a remote error
    pub const fn from_remote(error: &RemoteError) -> Self {
        if error.is_transient() {
            Self::Retry
        } else {
            Self::Failure
        }
    }

    /// Classify any crate error; domain errors are permanent
    pub const fn from_error(error: &Error) -> Self {
        match error {
            Error::Storage(error) => Self::from_storage(error),
            Error::Remote(error) => Self::from_remote(error),
            _ => Self::Failure,
        }
    }

    /// Most severe of two outcomes
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// Process exit code: 0, `EX_TEMPFAIL` (75) or 1
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Retry => 75,
            Self::Failure => 1,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Failure => "failure",
        })
    }
}
