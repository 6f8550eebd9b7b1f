//! Per-user settings with replication metadata

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{Timestamp, UserId};
use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Well-known key for the interface language.
pub const UI_LANGUAGE_KEY: &str = "ui_language";

/// Validated setting key (non-empty, trimmed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SettingKey(String);

impl SettingKey {
    /// Create a key, rejecting blank input
    pub fn new(key: impl Into<String>) -> Result<Self> {
        normalize_text_option(Some(key.into()))
            .map(Self)
            .ok_or_else(|| Error::InvalidInput("setting key must not be empty".into()))
    }

    /// Key of the interface language setting
    #[must_use]
    pub fn ui_language() -> Self {
        Self(UI_LANGUAGE_KEY.to_string())
    }

    /// Borrow the key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SettingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SettingKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SettingKey> for String {
    fn from(key: SettingKey) -> Self {
        key.0
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replication state of a single setting record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local and server agree
    Synced,
    /// Local edit waiting to be pushed
    Pending,
    /// Push in flight
    Syncing,
    /// Last push failed; will be retried
    Failed,
}

impl SyncStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A setting value with the versions used for conflict detection.
///
/// - `local_version` starts at 1 and increments on each local change
/// - `synced_version` is the `local_version` last acknowledged by the server
/// - `server_version` is the server's version, 0 when unknown
///
/// `local_version >= synced_version` always holds; the record is dirty while
/// `local_version > synced_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRecord {
    /// Owner
    pub user_id: UserId,
    /// Key
    pub key: SettingKey,
    /// Current local value (possibly not yet confirmed)
    pub value: String,
    /// Local modification counter
    pub local_version: i64,
    /// Last `local_version` the server acknowledged
    pub synced_version: i64,
    /// Server's version (0 = unknown)
    pub server_version: i64,
    /// Last local modification
    pub modified_at: Timestamp,
    /// Replication state
    pub sync_status: SyncStatus,
    /// Seeded from built-in defaults and never edited
    #[serde(default)]
    pub is_default: bool,
}

impl SettingRecord {
    /// First local write of a key
    #[must_use]
    pub fn new_local(user_id: UserId, key: SettingKey, value: String, now: Timestamp) -> Self {
        Self {
            user_id,
            key,
            value,
            local_version: 1,
            synced_version: 0,
            server_version: 0,
            modified_at: now,
            sync_status: SyncStatus::Pending,
            is_default: false,
        }
    }

    /// Built-in default written when nothing could be recovered; still pushed
    #[must_use]
    pub fn default_value(user_id: UserId, key: SettingKey, value: String, now: Timestamp) -> Self {
        Self {
            is_default: true,
            ..Self::new_local(user_id, key, value, now)
        }
    }

    /// Copy of the server's value, confirmed at `server_version`.
    ///
    /// Local versions start at 1 even when the server reports 0.
    #[must_use]
    pub fn recovered(
        user_id: UserId,
        key: SettingKey,
        value: String,
        server_version: i64,
        now: Timestamp,
    ) -> Self {
        Self {
            user_id,
            key,
            value,
            local_version: server_version.max(1),
            synced_version: server_version.max(1),
            server_version,
            modified_at: now,
            sync_status: SyncStatus::Synced,
            is_default: false,
        }
    }

    /// Apply a local edit on top of this record
    #[must_use]
    pub fn edited(mut self, value: String, now: Timestamp) -> Self {
        self.value = value;
        self.local_version += 1;
        self.modified_at = now;
        self.sync_status = SyncStatus::Pending;
        self.is_default = false;
        self
    }

    /// Whether local changes still await the server
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.local_version > self.synced_version
    }
}

/// Lifecycle state derived from [`SettingsMetadata`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsState {
    /// Nothing stored yet
    Empty,
    /// Built-in defaults, never touched
    Default,
    /// Everything confirmed by the server
    InSyncWithRemote,
    /// Local edits not yet confirmed
    Modified,
}

/// Sync metadata for a user's settings as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsMetadata {
    /// Values come from built-in defaults
    pub is_default: bool,
    /// Most recent local change
    pub last_modified_at: Timestamp,
    /// Most recent change confirmed by the server
    pub last_synced_at: Option<Timestamp>,
}

impl SettingsMetadata {
    /// Metadata of a user without any stored settings
    pub const EMPTY: Self = Self {
        is_default: false,
        last_modified_at: Timestamp::EPOCH,
        last_synced_at: None,
    };

    /// Derive metadata from stored records.
    ///
    /// The settings count as synced only while no record is dirty, so one
    /// pending key keeps the whole set `Modified`.
    #[must_use]
    pub fn from_records(records: &[SettingRecord]) -> Self {
        let Some(last_modified_at) = records.iter().map(|record| record.modified_at).max() else {
            return Self::EMPTY;
        };
        let all_synced = records.iter().all(|record| !record.is_dirty());

        Self {
            is_default: records.iter().all(|record| record.is_default),
            last_modified_at,
            last_synced_at: all_synced.then_some(last_modified_at),
        }
    }

    /// Derived lifecycle state
    #[must_use]
    pub fn state(&self) -> SettingsState {
        if self.last_modified_at.is_epoch() {
            return SettingsState::Empty;
        }
        match self.last_synced_at {
            None if self.is_default => SettingsState::Default,
            Some(synced) if synced == self.last_modified_at => SettingsState::InSyncWithRemote,
            _ => SettingsState::Modified,
        }
    }
}

/// Interface language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UiLanguage {
    /// English
    #[default]
    English,
    /// German
    German,
}

impl UiLanguage {
    /// Stored value
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::German => "German",
        }
    }

    /// Parse a stored value, falling back to the default for unknown input
    #[must_use]
    pub fn from_stored(value: &str) -> Self {
        match value.trim() {
            "German" => Self::German,
            _ => Self::English,
        }
    }
}

/// One setting as seen by readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    /// Latest local value, pending or confirmed
    pub value: String,
    /// Replication state of this value
    pub sync_status: SyncStatus,
}

/// Read model of a user's settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Owner
    pub user_id: UserId,
    /// Values by key
    pub entries: BTreeMap<SettingKey, SettingEntry>,
    /// Aggregate metadata
    pub metadata: SettingsMetadata,
}

impl Settings {
    /// Build the read model from stored records
    #[must_use]
    pub fn from_records(user_id: UserId, records: &[SettingRecord]) -> Self {
        let entries = records
            .iter()
            .map(|record| {
                (
                    record.key.clone(),
                    SettingEntry {
                        value: record.value.clone(),
                        sync_status: record.sync_status,
                    },
                )
            })
            .collect();
        Self {
            user_id,
            entries,
            metadata: SettingsMetadata::from_records(records),
        }
    }

    /// Value for a key, if stored
    #[must_use]
    pub fn value(&self, key: &SettingKey) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.value.as_str())
    }

    /// Typed interface language
    #[must_use]
    pub fn ui_language(&self) -> UiLanguage {
        self.value(&SettingKey::ui_language())
            .map(UiLanguage::from_stored)
            .unwrap_or_default()
    }
}

/// A resolved push conflict, reported for observability only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsConflictEvent {
    /// Owner
    pub user_id: UserId,
    /// Key
    pub setting_key: SettingKey,
    /// Value the client pushed
    pub local_value: String,
    /// Value the server holds
    pub server_value: String,
    /// Value persisted after resolution
    pub accepted_value: String,
    /// When the conflict was resolved
    pub conflicted_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(modified_at: i64, local: i64, synced: i64) -> SettingRecord {
        SettingRecord {
            user_id: UserId::new(),
            key: SettingKey::ui_language(),
            value: "English".to_string(),
            local_version: local,
            synced_version: synced,
            server_version: synced,
            modified_at: Timestamp::from_millis(modified_at),
            sync_status: if local > synced {
                SyncStatus::Pending
            } else {
                SyncStatus::Synced
            },
            is_default: false,
        }
    }

    #[test]
    fn setting_key_rejects_blank() {
        assert!(SettingKey::new("   ").is_err());
        assert_eq!(SettingKey::new(" theme ").unwrap().as_str(), "theme");
    }

    #[test]
    fn edits_bump_local_version_only() {
        let now = Timestamp::from_millis(10);
        let created = SettingRecord::new_local(
            UserId::new(),
            SettingKey::ui_language(),
            "English".into(),
            now,
        );
        assert_eq!(created.local_version, 1);
        assert_eq!(created.synced_version, 0);
        assert!(created.is_dirty());

        let edited = created.edited("German".into(), Timestamp::from_millis(20));
        assert_eq!(edited.local_version, 2);
        assert_eq!(edited.synced_version, 0);
        assert_eq!(edited.modified_at, Timestamp::from_millis(20));
        assert_eq!(edited.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn metadata_state_is_derived_from_timestamps() {
        assert_eq!(SettingsMetadata::EMPTY.state(), SettingsState::Empty);
        assert_eq!(
            SettingsMetadata::from_records(&[]),
            SettingsMetadata::EMPTY
        );

        let in_sync = SettingsMetadata::from_records(&[record(100, 2, 2), record(50, 1, 1)]);
        assert_eq!(in_sync.last_synced_at, Some(Timestamp::from_millis(100)));
        assert_eq!(in_sync.state(), SettingsState::InSyncWithRemote);

        let modified = SettingsMetadata::from_records(&[record(100, 2, 2), record(200, 3, 2)]);
        assert_eq!(modified.last_synced_at, None);
        assert_eq!(modified.state(), SettingsState::Modified);

        let never_synced = SettingsMetadata::from_records(&[record(100, 1, 0)]);
        assert_eq!(never_synced.state(), SettingsState::Modified);
    }

    #[test]
    fn older_pending_key_keeps_settings_modified() {
        // `a` was edited first and is still pending, `b` was edited later and synced
        let pending_a = record(100, 1, 0);
        let synced_b = record(200, 1, 1);

        let metadata = SettingsMetadata::from_records(&[pending_a, synced_b]);

        assert_eq!(metadata.last_modified_at, Timestamp::from_millis(200));
        assert_eq!(metadata.state(), SettingsState::Modified);
    }

    #[test]
    fn untouched_defaults_report_default_state() {
        let user = UserId::new();
        let seeded = SettingRecord::default_value(
            user,
            SettingKey::ui_language(),
            "English".into(),
            Timestamp::from_millis(10),
        );
        assert_eq!(
            SettingsMetadata::from_records(std::slice::from_ref(&seeded)).state(),
            SettingsState::Default
        );

        let edited = seeded.edited("German".into(), Timestamp::from_millis(20));
        assert!(!edited.is_default);
        assert_eq!(
            SettingsMetadata::from_records(&[edited]).state(),
            SettingsState::Modified
        );

        let synced_ahead = SettingsMetadata {
            is_default: false,
            last_modified_at: Timestamp::from_millis(10),
            last_synced_at: Some(Timestamp::from_millis(20)),
        };
        assert_eq!(synced_ahead.state(), SettingsState::Modified);
    }

    #[test]
    fn ui_language_falls_back_to_english() {
        assert_eq!(UiLanguage::from_stored("German"), UiLanguage::German);
        assert_eq!(UiLanguage::from_stored("Klingon"), UiLanguage::English);
    }

    #[test]
    fn sync_status_round_trips_storage_form() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
    }
}
