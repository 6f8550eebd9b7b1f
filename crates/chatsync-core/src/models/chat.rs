//! Chat, participant and chat list projections

use serde::{Deserialize, Serialize};

use super::{ChatId, Message, MessageId, ParticipantId, Timestamp};

/// A member of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique identifier
    pub id: ParticipantId,
    /// Display name
    pub name: String,
    /// Avatar URL
    #[serde(default)]
    pub picture_url: Option<String>,
    /// When the participant joined
    pub joined_at: Timestamp,
    /// Last seen online
    #[serde(default)]
    pub online_at: Option<Timestamp>,
}

impl Participant {
    /// Participant joining now
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(),
            name: name.into(),
            picture_url: None,
            joined_at: Timestamp::now(),
            online_at: None,
        }
    }
}

/// Chat fields carried by `Created` and `Updated` deltas
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMetadata {
    /// Display name
    pub name: String,
    /// Members
    #[serde(default)]
    pub participants: Vec<Participant>,
    /// Chat picture URL
    #[serde(default)]
    pub picture_url: Option<String>,
    /// Unread counter
    #[serde(default)]
    pub unread_messages_count: u32,
    /// Last message the user has read
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    /// Most recent activity
    #[serde(default)]
    pub last_activity_at: Option<Timestamp>,
}

/// A chat with its messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier
    pub id: ChatId,
    /// Display name
    pub name: String,
    /// Members
    pub participants: Vec<Participant>,
    /// Chat picture URL
    pub picture_url: Option<String>,
    /// Unread counter
    pub unread_messages_count: u32,
    /// Last message the user has read
    pub last_read_message_id: Option<MessageId>,
    /// Most recent activity
    pub last_activity_at: Option<Timestamp>,
    /// Messages ordered by creation time
    pub messages: Vec<Message>,
}

impl Chat {
    /// Create an empty chat
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_parts(
            ChatId::new(),
            ChatMetadata {
                name: name.into(),
                last_activity_at: Some(Timestamp::now()),
                ..ChatMetadata::default()
            },
            Vec::new(),
        )
    }

    /// Assemble a chat from its metadata and messages
    #[must_use]
    pub fn from_parts(id: ChatId, metadata: ChatMetadata, messages: Vec<Message>) -> Self {
        Self {
            id,
            name: metadata.name,
            participants: metadata.participants,
            picture_url: metadata.picture_url,
            unread_messages_count: metadata.unread_messages_count,
            last_read_message_id: metadata.last_read_message_id,
            last_activity_at: metadata.last_activity_at,
            messages,
        }
    }

    /// Metadata part of this chat
    #[must_use]
    pub fn metadata(&self) -> ChatMetadata {
        ChatMetadata {
            name: self.name.clone(),
            participants: self.participants.clone(),
            picture_url: self.picture_url.clone(),
            unread_messages_count: self.unread_messages_count,
            last_read_message_id: self.last_read_message_id,
            last_activity_at: self.last_activity_at,
        }
    }

    /// List projection of this chat
    #[must_use]
    pub fn preview(&self) -> ChatPreview {
        ChatPreview {
            id: self.id,
            name: self.name.clone(),
            participants: self.participants.clone(),
            picture_url: self.picture_url.clone(),
            unread_messages_count: self.unread_messages_count,
            last_activity_at: self.last_activity_at,
            last_message: self.messages.iter().max_by_key(|m| m.created_at).cloned(),
        }
    }
}

/// Chat list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPreview {
    /// Unique identifier
    pub id: ChatId,
    /// Display name
    pub name: String,
    /// Members
    pub participants: Vec<Participant>,
    /// Chat picture URL
    pub picture_url: Option<String>,
    /// Unread counter
    pub unread_messages_count: u32,
    /// Most recent activity
    pub last_activity_at: Option<Timestamp>,
    /// Latest message, if any
    pub last_message: Option<Message>,
}
