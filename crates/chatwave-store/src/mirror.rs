//! Durable mirror of the client chat cache.
//!
//! Each row is an opaque JSON snapshot of one cached chat; the client cache
//! owns its format.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use chatwave_shared::types::ChatId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{from_micros, parse_uuid, to_micros, MirrorRecord};

impl Database {
    /// Insert or replace the snapshot of `chat_id`.
    pub fn save_mirror(
        &self,
        chat_id: ChatId,
        snapshot: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO mirror_entries (chat_id, snapshot, updated_at_us)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET
                 snapshot = excluded.snapshot,
                 updated_at_us = excluded.updated_at_us",
            params![chat_id.to_string(), snapshot, to_micros(updated_at)],
        )?;
        Ok(())
    }

    pub fn load_mirror(&self, chat_id: ChatId) -> Result<Option<MirrorRecord>> {
        let row: Option<(String, i64)> = self
            .conn()
            .query_row(
                "SELECT snapshot, updated_at_us FROM mirror_entries WHERE chat_id = ?1",
                params![chat_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((snapshot, updated_us)) => Ok(Some(MirrorRecord {
                chat_id,
                snapshot,
                updated_at: from_micros(1, updated_us)?,
            })),
            None => Ok(None),
        }
    }

    /// Delete the snapshot of `chat_id`.  Returns `true` if a row was deleted.
    pub fn delete_mirror(&self, chat_id: ChatId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM mirror_entries WHERE chat_id = ?1",
            params![chat_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Mirrored chats, most recently updated first.
    pub fn list_mirrors(&self) -> Result<Vec<ChatId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT chat_id FROM mirror_entries ORDER BY updated_at_us DESC")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            Ok(ChatId(parse_uuid(0, &id)?))
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}
