//! Incremental chat list changes returned by the server

use serde::{Deserialize, Serialize};

use super::{ChatId, ChatMetadata, Message, MessageId, Participant, Timestamp};

/// A single change to the chat list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatDelta {
    /// Chat appeared; upsert when it already exists locally
    Created {
        /// Chat
        chat_id: ChatId,
        /// Initial metadata
        metadata: ChatMetadata,
        /// Messages present at creation
        #[serde(default)]
        initial_messages: Vec<Message>,
        /// Server time of the change
        timestamp: Timestamp,
    },
    /// Chat metadata and messages changed
    Updated {
        /// Chat
        chat_id: ChatId,
        /// Replacement metadata
        metadata: ChatMetadata,
        /// Messages to insert or replace
        #[serde(default)]
        messages_to_add: Vec<Message>,
        /// Messages to remove
        #[serde(default)]
        messages_to_delete: Vec<MessageId>,
        /// Server time of the change
        timestamp: Timestamp,
    },
    /// Chat removed
    Deleted {
        /// Chat
        chat_id: ChatId,
        /// Server time of the change
        timestamp: Timestamp,
    },
    /// Member list replaced
    ParticipantChanged {
        /// Chat
        chat_id: ChatId,
        /// New member list
        participants: Vec<Participant>,
        /// Server time of the change
        timestamp: Timestamp,
    },
    /// One message arrived
    MessageAdded {
        /// Chat
        chat_id: ChatId,
        /// Message
        message: Message,
        /// Server time of the change
        timestamp: Timestamp,
    },
}

impl ChatDelta {
    /// Chat this change targets
    pub const fn chat_id(&self) -> ChatId {
        match self {
            Self::Created { chat_id, .. }
            | Self::Updated { chat_id, .. }
            | Self::Deleted { chat_id, .. }
            | Self::ParticipantChanged { chat_id, .. }
            | Self::MessageAdded { chat_id, .. } => *chat_id,
        }
    }

    /// Server time of the change
    pub const fn timestamp(&self) -> Timestamp {
        match self {
            Self::Created { timestamp, .. }
            | Self::Updated { timestamp, .. }
            | Self::Deleted { timestamp, .. }
            | Self::ParticipantChanged { timestamp, .. }
            | Self::MessageAdded { timestamp, .. } => *timestamp,
        }
    }
}

/// One page of chat list changes.
///
/// `from_timestamp == None` on a response means the server sent a full
/// snapshot; the client then drops local chats the snapshot does not contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatListDelta {
    /// Cursor the page starts from, `None` for a full resync
    #[serde(default)]
    pub from_timestamp: Option<Timestamp>,
    /// Cursor to store after applying the page
    pub to_timestamp: Timestamp,
    /// Changes in server order
    #[serde(default)]
    pub changes: Vec<ChatDelta>,
    /// Whether another page is immediately available
    #[serde(default)]
    pub has_more_changes: bool,
}

impl ChatListDelta {
    /// Whether this page is a full snapshot
    #[must_use]
    pub const fn is_full_resync(&self) -> bool {
        self.from_timestamp.is_none()
    }
}
