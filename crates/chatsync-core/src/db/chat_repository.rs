//! Chat and message table access, including delta application

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use super::connection::{json_column, optional_column, parse_column};
use crate::delivery;
use crate::error::{Error, Result};
use crate::models::{
    Chat, ChatDelta, ChatId, ChatListDelta, ChatMetadata, ChatPreview, DeliveryStatus, Message,
    MessageId, Participant, Timestamp,
};

const CHAT_COLUMNS: &str = "id, name, participants, picture_url, unread_messages_count, \
                            last_read_message_id, last_activity_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, text, created_at, delivery_status";

/// Counters of one applied delta page, for logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyStats {
    /// Changes written
    pub applied: usize,
    /// Changes ignored because their chat is gone
    pub skipped: usize,
    /// Chats dropped by a full snapshot
    pub pruned: usize,
}

/// Chat queries over a connection or an open transaction
pub struct ChatRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ChatRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Whether a chat exists
    pub fn exists(&self, id: ChatId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Chat with messages ordered by creation time
    pub fn get(&self, id: ChatId) -> Result<Option<Chat>> {
        let Some((id, metadata)) = self
            .conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?"),
                params![id.as_str()],
                Self::parse_chat_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ? ORDER BY created_at, id"
        ))?;
        let messages = stmt
            .query_map(params![id.as_str()], Self::parse_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(Chat::from_parts(id, metadata, messages)))
    }

    /// Chat list with the latest message of each chat
    pub fn previews(&self) -> Result<Vec<ChatPreview>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             ORDER BY last_activity_at IS NULL, last_activity_at DESC, name"
        ))?;
        let chats = stmt
            .query_map([], Self::parse_chat_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut latest = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))?;
        chats
            .into_iter()
            .map(|(id, metadata)| {
                let last_message = latest
                    .query_row(params![id.as_str()], Self::parse_message)
                    .optional()?;
                Ok(ChatPreview {
                    id,
                    name: metadata.name,
                    participants: metadata.participants,
                    picture_url: metadata.picture_url,
                    unread_messages_count: metadata.unread_messages_count,
                    last_activity_at: metadata.last_activity_at,
                    last_message,
                })
            })
            .collect()
    }

    /// Insert or replace a chat's metadata
    pub fn upsert(&self, id: ChatId, metadata: &ChatMetadata) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO chats ({CHAT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    participants = excluded.participants,
                    picture_url = excluded.picture_url,
                    unread_messages_count = excluded.unread_messages_count,
                    last_read_message_id = excluded.last_read_message_id,
                    last_activity_at = excluded.last_activity_at"
            ),
            params![
                id.as_str(),
                metadata.name,
                serde_json::to_string(&metadata.participants)?,
                metadata.picture_url,
                metadata.unread_messages_count,
                metadata.last_read_message_id.map(|m| m.as_str()),
                metadata.last_activity_at.map(Timestamp::as_millis),
            ],
        )?;
        Ok(())
    }

    /// Insert a chat and its messages, rejecting existing ids
    pub fn insert(&self, chat: &Chat) -> Result<()> {
        if self.exists(chat.id)? {
            return Err(Error::DuplicateChatId(chat.id));
        }
        self.upsert(chat.id, &chat.metadata())?;
        for message in &chat.messages {
            self.insert_message(&Message {
                chat_id: chat.id,
                ..message.clone()
            })?;
        }
        Ok(())
    }

    /// Replace the member list
    pub fn set_participants(&self, id: ChatId, participants: &[Participant]) -> Result<()> {
        self.conn.execute(
            "UPDATE chats SET participants = ? WHERE id = ?",
            params![serde_json::to_string(participants)?, id.as_str()],
        )?;
        Ok(())
    }

    /// Delete a chat and its messages; no-op when missing
    pub fn delete(&self, id: ChatId) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM chats WHERE id = ?", params![id.as_str()])?;
        Ok(deleted > 0)
    }

    /// Record that the server knows this chat
    fn mark_from_server(&self, id: ChatId) -> Result<()> {
        self.conn.execute(
            "UPDATE chats SET from_server = 1 WHERE id = ?",
            params![id.as_str()],
        )?;
        Ok(())
    }

    /// Delete every server-known chat not in `keep`.
    ///
    /// Chats created on this device and never echoed by the server stay.
    pub fn retain_only(&self, keep: &HashSet<ChatId>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM chats WHERE from_server = 1")?;
        let existing = stmt
            .query_map([], |row| parse_column::<ChatId>(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut removed = 0;
        for id in existing.into_iter().filter(|id| !keep.contains(id)) {
            if self.delete(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Get one message
    pub fn message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                params![id.as_str()],
                Self::parse_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Insert a new message into an existing chat
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        if !self.exists(message.chat_id)? {
            return Err(Error::ChatNotFound(message.chat_id));
        }
        if self.message(message.id)?.is_some() {
            return Err(Error::InvalidInput(format!(
                "message {} already exists",
                message.id
            )));
        }
        if message.delivery_status.is_some() {
            delivery::validate(None, message.delivery_status.as_ref())?;
        }
        self.write_message(message)?;
        self.touch(message.chat_id, message.created_at)
    }

    /// Insert or replace a message received from the server.
    ///
    /// An existing delivery status survives when the incoming one would be an
    /// illegal transition.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let mut message = message.clone();
        if let Some(existing) = self.message(message.id)? {
            if let Err(error) = delivery::validate(
                existing.delivery_status.as_ref(),
                message.delivery_status.as_ref(),
            ) {
                tracing::debug!(
                    message_id = %message.id,
                    %error,
                    "Keeping stored delivery status"
                );
                message.delivery_status = existing.delivery_status;
            }
        }
        self.write_message(&message)
    }

    /// Overwrite a message's delivery status
    pub fn set_delivery_status(&self, id: MessageId, status: Option<&DeliveryStatus>) -> Result<()> {
        self.conn.execute(
            "UPDATE messages SET delivery_status = ? WHERE id = ?",
            params![encode_status(status)?, id.as_str()],
        )?;
        Ok(())
    }

    /// Delete one message
    pub fn delete_message(&self, id: MessageId) -> Result<()> {
        self.conn
            .execute("DELETE FROM messages WHERE id = ?", params![id.as_str()])?;
        Ok(())
    }

    /// Apply a page of changes in server order
    pub fn apply_delta(&self, delta: &ChatListDelta) -> Result<ApplyStats> {
        let mut stats = ApplyStats::default();
        for change in &delta.changes {
            if self.apply_change(change)? {
                stats.applied += 1;
            } else {
                stats.skipped += 1;
            }
        }
        Ok(stats)
    }

    /// Returns `false` when the change targets a chat that no longer exists
    fn apply_change(&self, change: &ChatDelta) -> Result<bool> {
        match change {
            ChatDelta::Created {
                chat_id,
                metadata,
                initial_messages,
                ..
            } => {
                self.upsert(*chat_id, metadata)?;
                self.mark_from_server(*chat_id)?;
                for message in initial_messages {
                    self.upsert_message(&with_chat(message, *chat_id))?;
                }
            }
            ChatDelta::Updated {
                chat_id,
                metadata,
                messages_to_add,
                messages_to_delete,
                ..
            } => {
                if !self.exists(*chat_id)? {
                    return Ok(false);
                }
                self.upsert(*chat_id, metadata)?;
                self.mark_from_server(*chat_id)?;
                for message in messages_to_add {
                    self.upsert_message(&with_chat(message, *chat_id))?;
                }
                for id in messages_to_delete {
                    self.delete_message(*id)?;
                }
            }
            ChatDelta::Deleted { chat_id, .. } => {
                self.delete(*chat_id)?;
            }
            ChatDelta::ParticipantChanged {
                chat_id,
                participants,
                ..
            } => {
                if !self.exists(*chat_id)? {
                    return Ok(false);
                }
                self.set_participants(*chat_id, participants)?;
                self.mark_from_server(*chat_id)?;
            }
            ChatDelta::MessageAdded {
                chat_id, message, ..
            } => {
                if !self.exists(*chat_id)? {
                    return Ok(false);
                }
                self.upsert_message(&with_chat(message, *chat_id))?;
                self.mark_from_server(*chat_id)?;
            }
        }
        Ok(true)
    }

    fn write_message(&self, message: &Message) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    chat_id = excluded.chat_id,
                    sender_id = excluded.sender_id,
                    text = excluded.text,
                    created_at = excluded.created_at,
                    delivery_status = excluded.delivery_status"
            ),
            params![
                message.id.as_str(),
                message.chat_id.as_str(),
                message.sender_id.as_str(),
                message.text,
                message.created_at.as_millis(),
                encode_status(message.delivery_status.as_ref())?,
            ],
        )?;
        Ok(())
    }

    /// Advance a chat's last activity
    fn touch(&self, id: ChatId, at: Timestamp) -> Result<()> {
        self.conn.execute(
            "UPDATE chats SET last_activity_at = MAX(COALESCE(last_activity_at, 0), ?) WHERE id = ?",
            params![at.as_millis(), id.as_str()],
        )?;
        Ok(())
    }

    fn parse_chat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ChatId, ChatMetadata)> {
        Ok((
            parse_column(row, 0)?,
            ChatMetadata {
                name: row.get(1)?,
                participants: json_column(row, 2)?,
                picture_url: row.get(3)?,
                unread_messages_count: row.get(4)?,
                last_read_message_id: optional_column(row, 5)?,
                last_activity_at: row.get::<_, Option<i64>>(6)?.map(Timestamp::from_millis),
            },
        ))
    }

    fn parse_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let status: Option<String> = row.get(5)?;
        Ok(Message {
            id: parse_column(row, 0)?,
            chat_id: parse_column(row, 1)?,
            sender_id: parse_column(row, 2)?,
            text: row.get(3)?,
            created_at: Timestamp::from_millis(row.get(4)?),
            delivery_status: match status {
                Some(_) => Some(json_column(row, 5)?),
                None => None,
            },
        })
    }
}

fn with_chat(message: &Message, chat_id: ChatId) -> Message {
    Message {
        chat_id,
        ..message.clone()
    }
}

fn encode_status(status: Option<&DeliveryStatus>) -> Result<Option<String>> {
    Ok(status.map(serde_json::to_string).transpose()?)
}
