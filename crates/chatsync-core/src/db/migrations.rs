//! Database migrations

use rusqlite::{Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    tracing::debug!(version = CURRENT_VERSION, "Schema up to date");
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

/// Migration to version 1: settings, chats, messages and stream metadata
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS settings (
            user_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            synced_version INTEGER NOT NULL DEFAULT 0,
            server_version INTEGER NOT NULL DEFAULT 0,
            modified_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL,
            PRIMARY KEY (user_id, key),
            CHECK (local_version >= synced_version)
        );

        CREATE TABLE IF NOT EXISTS chats (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            participants TEXT NOT NULL DEFAULT '[]',
            picture_url TEXT,
            unread_messages_count INTEGER NOT NULL DEFAULT 0,
            last_read_message_id TEXT,
            last_activity_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            delivery_status TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS sync_metadata (
            stream TEXT PRIMARY KEY,
            last_sync_timestamp INTEGER,
            sync_status TEXT NOT NULL,
            last_error TEXT,
            updated_at INTEGER NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 2: partial index for the pending-settings scan
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_settings_dirty
            ON settings(user_id) WHERE local_version > synced_version;

        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;
    Ok(())
}

/// Migration to version 3: chat origin and default settings
///
/// Chats stored before this version are treated as created on this device.
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "ALTER TABLE chats ADD COLUMN from_server INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE settings ADD COLUMN is_default INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_version (version) VALUES (3);",
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap();
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn settings_reject_synced_ahead_of_local() {
        let mut conn = Connection::open_in_memory().unwrap();
        run(&mut conn).unwrap();
        let result = conn.execute(
            "INSERT INTO settings (user_id, key, value, local_version, synced_version, modified_at, sync_status)
             VALUES ('u', 'k', 'v', 1, 2, 0, 'synced')",
            [],
        );
        assert!(result.is_err());
    }
}
