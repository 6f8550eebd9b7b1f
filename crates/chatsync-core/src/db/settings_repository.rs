//! Settings table access

use rusqlite::{params, Connection, OptionalExtension};

use super::connection::parse_column;
use crate::error::Result;
use crate::models::{SettingKey, SettingRecord, Timestamp, UserId};

const COLUMNS: &str = "user_id, key, value, local_version, synced_version, server_version, \
                       modified_at, sync_status, is_default";

/// Setting queries over a connection or an open transaction
pub struct SettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get one record
    pub fn get(&self, user_id: UserId, key: &SettingKey) -> Result<Option<SettingRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM settings WHERE user_id = ? AND key = ?"),
                params![user_id.as_str(), key.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records of a user
    pub fn list(&self, user_id: UserId) -> Result<Vec<SettingRecord>> {
        self.query(
            &format!("SELECT {COLUMNS} FROM settings WHERE user_id = ? ORDER BY key"),
            user_id,
        )
    }

    /// Whether a user has any stored record
    pub fn has_any(&self, user_id: UserId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM settings WHERE user_id = ?)",
            params![user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Records with unconfirmed local changes
    pub fn list_pending(&self, user_id: UserId) -> Result<Vec<SettingRecord>> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM settings
                 WHERE user_id = ? AND local_version > synced_version ORDER BY key"
            ),
            user_id,
        )
    }

    /// Insert or replace a record
    pub fn save(&self, record: &SettingRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO settings ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, key) DO UPDATE SET
                    value = excluded.value,
                    local_version = excluded.local_version,
                    synced_version = excluded.synced_version,
                    server_version = excluded.server_version,
                    modified_at = excluded.modified_at,
                    sync_status = excluded.sync_status,
                    is_default = excluded.is_default"
            ),
            params![
                record.user_id.as_str(),
                record.key.as_str(),
                record.value,
                record.local_version,
                record.synced_version,
                record.server_version,
                record.modified_at.as_millis(),
                record.sync_status.as_str(),
                record.is_default,
            ],
        )?;
        Ok(())
    }

    fn query(&self, sql: &str, user_id: UserId) -> Result<Vec<SettingRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params![user_id.as_str()], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingRecord> {
        Ok(SettingRecord {
            user_id: parse_column(row, 0)?,
            key: parse_column(row, 1)?,
            value: row.get(2)?,
            local_version: row.get(3)?,
            synced_version: row.get(4)?,
            server_version: row.get(5)?,
            modified_at: Timestamp::from_millis(row.get(6)?),
            sync_status: parse_column(row, 7)?,
            is_default: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;
    use crate::models::SyncStatus;
    use pretty_assertions::assert_eq;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations::run(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_save_and_get() {
        let conn = setup();
        let repo = SettingsRepository::new(&conn);
        let user = UserId::new();
        let record = SettingRecord::new_local(
            user,
            SettingKey::ui_language(),
            "German".into(),
            Timestamp::from_millis(5),
        );

        repo.save(&record).unwrap();
        assert_eq!(
            repo.get(user, &SettingKey::ui_language()).unwrap(),
            Some(record)
        );
        assert_eq!(
            repo.get(UserId::new(), &SettingKey::ui_language()).unwrap(),
            None
        );
    }

    #[test]
    fn test_list_pending_skips_clean_records() {
        let conn = setup();
        let repo = SettingsRepository::new(&conn);
        let user = UserId::new();
        let now = Timestamp::from_millis(1);

        let mut clean =
            SettingRecord::new_local(user, SettingKey::new("theme").unwrap(), "dark".into(), now);
        clean.synced_version = 1;
        clean.sync_status = SyncStatus::Synced;
        repo.save(&clean).unwrap();
        let dirty = SettingRecord::new_local(user, SettingKey::ui_language(), "German".into(), now);
        repo.save(&dirty).unwrap();

        assert_eq!(repo.list(user).unwrap().len(), 2);
        assert_eq!(repo.list_pending(user).unwrap(), vec![dirty]);
    }

    #[test]
    fn test_default_flag_is_stored() {
        let conn = setup();
        let repo = SettingsRepository::new(&conn);
        let user = UserId::new();
        assert!(!repo.has_any(user).unwrap());

        let seeded = SettingRecord::default_value(
            user,
            SettingKey::ui_language(),
            "English".into(),
            Timestamp::from_millis(3),
        );
        repo.save(&seeded).unwrap();

        assert!(repo.has_any(user).unwrap());
        let stored = repo.get(user, &SettingKey::ui_language()).unwrap().unwrap();
        assert!(stored.is_default);
        assert_eq!(stored, seeded);
    }
}
