//! Stream cursor and status access

use rusqlite::{params, Connection, OptionalExtension};

use super::connection::parse_column;
use crate::error::Result;
use crate::models::{StreamSyncStatus, SyncMetadata, Timestamp};

/// Sync metadata queries over a connection or an open transaction
pub struct SyncMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SyncMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Metadata of a stream, defaulting to a never-synced row
    pub fn get(&self, stream: &str) -> Result<SyncMetadata> {
        let metadata = self
            .conn
            .query_row(
                "SELECT stream, last_sync_timestamp, sync_status, last_error, updated_at
                 FROM sync_metadata WHERE stream = ?",
                params![stream],
                |row| {
                    Ok(SyncMetadata {
                        stream: row.get(0)?,
                        last_sync_timestamp: row
                            .get::<_, Option<i64>>(1)?
                            .map(Timestamp::from_millis),
                        sync_status: parse_column(row, 2)?,
                        last_error: row.get(3)?,
                        updated_at: Timestamp::from_millis(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(metadata.unwrap_or_else(|| SyncMetadata::new(stream)))
    }

    /// Change the status without touching the cursor
    pub fn set_status(
        &self,
        stream: &str,
        status: StreamSyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (stream, sync_status, last_error, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(stream) DO UPDATE SET
                sync_status = excluded.sync_status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
            params![
                stream,
                status.as_str(),
                error,
                Timestamp::now().as_millis()
            ],
        )?;
        Ok(())
    }

    /// Overwrite the cursor and mark the stream idle.
    ///
    /// The stored cursor is replaced even when the new one is older: after a
    /// server-side reset, the server's clock is the only valid reference.
    pub fn complete(&self, stream: &str, cursor: Timestamp) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (stream, last_sync_timestamp, sync_status, last_error, updated_at)
             VALUES (?, ?, ?, NULL, ?)
             ON CONFLICT(stream) DO UPDATE SET
                last_sync_timestamp = excluded.last_sync_timestamp,
                sync_status = excluded.sync_status,
                last_error = NULL,
                updated_at = excluded.updated_at",
            params![
                stream,
                cursor.as_millis(),
                StreamSyncStatus::Idle.as_str(),
                Timestamp::now().as_millis()
            ],
        )?;
        Ok(())
    }
}
