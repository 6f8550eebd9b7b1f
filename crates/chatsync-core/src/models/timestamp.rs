//! Millisecond timestamps used for cursors and modification stamps

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in milliseconds.
///
/// Cursors are opaque to the client: the only operations the sync engine
/// performs on them are storing and sending them back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Unix epoch
    pub const EPOCH: Self = Self(0);

    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Build from Unix milliseconds
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Unix milliseconds
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Whether this is the epoch
    #[must_use]
    pub const fn is_epoch(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp_millis(self.0) {
            Some(datetime) => write!(f, "{}", datetime.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_zero() {
        assert!(Timestamp::EPOCH.is_epoch());
        assert_eq!(Timestamp::default(), Timestamp::EPOCH);
        assert!(!Timestamp::now().is_epoch());
    }

    #[test]
    fn display_uses_rfc3339() {
        assert_eq!(
            Timestamp::from_millis(0).to_string(),
            "1970-01-01T00:00:00+00:00"
        );
    }
}
