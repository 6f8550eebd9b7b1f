//! Data models for chatsync

mod chat;
mod delta;
mod ids;
mod message;
mod settings;
mod sync_metadata;
mod timestamp;

pub use chat::{Chat, ChatMetadata, ChatPreview, Participant};
pub use delta::{ChatDelta, ChatListDelta};
pub use ids::{ChatId, MessageId, ParticipantId, UserId};
pub use message::{DeliveryStatus, FailedReason, Message};
pub use settings::{
    SettingEntry, SettingKey, SettingRecord, Settings, SettingsConflictEvent, SettingsMetadata,
    SettingsState, SyncStatus, UiLanguage, UI_LANGUAGE_KEY,
};
pub use sync_metadata::{StreamSyncStatus, SyncMetadata, CHAT_LIST_STREAM};
pub use timestamp::Timestamp;
