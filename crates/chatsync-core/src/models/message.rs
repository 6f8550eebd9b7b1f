//! Message model and delivery status

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ChatId, MessageId, ParticipantId, Timestamp};

/// Why sending a message failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedReason {
    /// No connectivity on the device
    NetworkUnavailable,
    /// Server did not answer
    ServerUnreachable,
    /// Sending took too long
    Timeout,
    /// Anything else
    Unknown,
}

/// Delivery state of an outgoing message.
///
/// Absence of a status (`None` at the use site) is a valid pre-state that
/// may only move to [`DeliveryStatus::Sending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Upload in progress, percent in `0..=100`
    Sending {
        /// Upload progress in percent
        progress: u8,
    },
    /// Accepted by the server
    Sent,
    /// Delivered to the recipient's device
    Delivered,
    /// Read by the recipient
    Read,
    /// Sending failed
    Failed {
        /// Failure cause
        reason: FailedReason,
    },
}

impl DeliveryStatus {
    /// Short label used in logs and the CLI
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sending { .. } => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sending { progress } => write!(f, "sending ({progress}%)"),
            Self::Failed { reason } => write!(f, "failed ({reason:?})"),
            other => f.write_str(other.label()),
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier
    pub id: MessageId,
    /// Owning chat
    pub chat_id: ChatId,
    /// Author
    pub sender_id: ParticipantId,
    /// Plain text content
    pub text: String,
    /// Creation time
    pub created_at: Timestamp,
    /// Delivery state, if tracked
    #[serde(default)]
    pub delivery_status: Option<DeliveryStatus>,
}

impl Message {
    /// Create an outgoing message that is about to be sent
    #[must_use]
    pub fn new(chat_id: ChatId, sender_id: ParticipantId, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            text: text.into(),
            created_at: Timestamp::now(),
            delivery_status: Some(DeliveryStatus::Sending { progress: 0 }),
        }
    }
}
