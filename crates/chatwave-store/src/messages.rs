//! The ordered, per-chat message log.
//!
//! Ordering key is `(created_at_us, id)`. [`Database::append_message`] picks
//! a `created_at_us` strictly greater than every existing message of the
//! chat inside the same transaction that inserts the row, so no two messages
//! of a chat ever share an ordering position and positions never change.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use chatwave_shared::status::MessageStatus;
use chatwave_shared::types::{AttachmentRef, ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    from_micros, parse_uuid, status_from_rank, status_rank, to_micros, Cursor, Message, Payload,
    StatusUpdate,
};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, content, attachment, status, created_at_us";

impl Database {
    /// Durably append a message to `chat_id` with status `sent`.
    ///
    /// Message creation and the chat's last-activity bump commit together or
    /// not at all.
    pub fn append_message(
        &mut self,
        chat_id: ChatId,
        sender_id: UserId,
        payload: &Payload,
    ) -> Result<Message> {
        let payload = payload.clone().normalized();
        if payload.is_empty() {
            return Err(StoreError::Invalid(
                "message needs text content or an attachment".into(),
            ));
        }

        let tx = self.conn_mut().transaction()?;

        let chat_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM chats WHERE id = ?1",
                params![chat_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if chat_exists.is_none() {
            return Err(StoreError::NotFound);
        }

        let last_us: Option<i64> = tx.query_row(
            "SELECT MAX(created_at_us) FROM messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
            |row| row.get(0),
        )?;
        let now_us = to_micros(Utc::now());
        let created_us = match last_us {
            Some(last) if last >= now_us => last + 1,
            _ => now_us,
        };

        let id = MessageId::new();
        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, attachment, status, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                chat_id.to_string(),
                sender_id.to_string(),
                payload.content,
                payload.attachment.as_ref().map(|a| a.0.as_str()),
                status_rank(MessageStatus::Sent),
                created_us,
            ],
        )?;
        tx.execute(
            "UPDATE chats SET last_activity_us = MAX(last_activity_us, ?2) WHERE id = ?1",
            params![chat_id.to_string(), created_us],
        )?;
        tx.commit()?;

        Ok(Message {
            id,
            chat_id,
            sender_id,
            payload,
            status: MessageStatus::Sent,
            created_at: from_micros(6, created_us)?,
        })
    }

    /// Messages of `chat_id` strictly after `cursor`, ascending, at most
    /// `limit` of them. `None` starts from the beginning of the log.
    pub fn list_messages_since(
        &self,
        chat_id: ChatId,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let (after_us, after_id) = match cursor {
            Some(c) => (to_micros(c.created_at), c.id.to_string()),
            None => (i64::MIN, String::new()),
        };

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
               AND (created_at_us > ?2 OR (created_at_us = ?2 AND id > ?3))
             ORDER BY created_at_us ASC, id ASC
             LIMIT ?4"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![chat_id.to_string(), after_us, after_id, limit],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_message)
            .map_err(StoreError::from_query)
    }

    /// Move a message's status forward. Anything that is not a strict
    /// advance leaves the row untouched and reports
    /// [`StatusUpdate::Unchanged`].
    pub fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusUpdate> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = ?2 WHERE id = ?1 AND status < ?2",
            params![id.to_string(), status_rank(status)],
        )?;

        let message = self.get_message(id)?;
        if affected > 0 {
            Ok(StatusUpdate::Advanced(message))
        } else {
            Ok(StatusUpdate::Unchanged(message))
        }
    }

    /// Mark every message in `chat_id` not sent by `reader` as read.
    ///
    /// Returns the messages whose status actually advanced, in log order.
    pub fn mark_read_up_to_now(&mut self, chat_id: ChatId, reader: UserId) -> Result<Vec<Message>> {
        let tx = self.conn_mut().transaction()?;

        let pending = {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE chat_id = ?1 AND sender_id != ?2 AND status < ?3
                 ORDER BY created_at_us ASC, id ASC"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    chat_id.to_string(),
                    reader.to_string(),
                    status_rank(MessageStatus::Read)
                ],
                row_to_message,
            )?;
            let mut pending = Vec::new();
            for row in rows {
                pending.push(row?);
            }
            pending
        };

        tx.execute(
            "UPDATE messages SET status = ?3
             WHERE chat_id = ?1 AND sender_id != ?2 AND status < ?3",
            params![
                chat_id.to_string(),
                reader.to_string(),
                status_rank(MessageStatus::Read)
            ],
        )?;
        tx.commit()?;

        Ok(pending
            .into_iter()
            .map(|m| Message {
                status: MessageStatus::Read,
                ..m
            })
            .collect())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_id_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let content: Option<String> = row.get(3)?;
    let attachment: Option<String> = row.get(4)?;
    let status: i64 = row.get(5)?;
    let created_us: i64 = row.get(6)?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        chat_id: ChatId(parse_uuid(1, &chat_id_str)?),
        sender_id: UserId(parse_uuid(2, &sender_str)?),
        payload: Payload {
            content,
            attachment: attachment.map(AttachmentRef),
        },
        status: status_from_rank(5, status)?,
        created_at: from_micros(6, created_us)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn setup() -> (Database, ChatId, UserId, UserId) {
        let mut db = Database::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let chat = db.get_or_create_direct_chat(a, b).unwrap();
        (db, chat.id, a, b)
    }

    #[test]
    fn append_assigns_unique_increasing_positions() {
        let (mut db, chat, a, _) = setup();

        let mut ids = HashSet::new();
        let mut last: Option<Cursor> = None;
        for i in 0..50 {
            let msg = db
                .append_message(chat, a, &Payload::text(format!("m{i}")))
                .unwrap();
            assert_eq!(msg.status, MessageStatus::Sent);
            assert!(ids.insert(msg.id), "id reused");
            if let Some(prev) = last {
                assert!(prev.precedes(&msg.cursor()));
                assert!(prev.created_at < msg.created_at);
            }
            last = Some(msg.cursor());
        }
    }

    #[test]
    fn append_bumps_last_activity() {
        let (mut db, chat, a, _) = setup();
        let before = db.get_chat(chat).unwrap().last_activity_at;
        let msg = db.append_message(chat, a, &Payload::text("hi")).unwrap();
        let after = db.get_chat(chat).unwrap().last_activity_at;
        assert!(after >= before);
        assert_eq!(after, msg.created_at);
    }

    #[test]
    fn append_rejects_empty_and_unknown_chat() {
        let (mut db, chat, a, _) = setup();
        assert!(matches!(
            db.append_message(chat, a, &Payload::text("  ")),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.append_message(ChatId::new(), a, &Payload::text("hi")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_since_is_exclusive_ordered_and_paged() {
        let (mut db, chat, a, b) = setup();
        let mut sent = Vec::new();
        for i in 0..7 {
            let sender = if i % 2 == 0 { a } else { b };
            sent.push(
                db.append_message(chat, sender, &Payload::text(format!("m{i}")))
                    .unwrap(),
            );
        }

        let mut collected = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = db.list_messages_since(chat, cursor.as_ref(), 3).unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(Message::cursor);
            collected.extend(page);
        }

        let got: Vec<MessageId> = collected.iter().map(|m| m.id).collect();
        let want: Vec<MessageId> = sent.iter().map(|m| m.id).collect();
        assert_eq!(got, want);

        let tail = db
            .list_messages_since(chat, Some(&sent[4].cursor()), 100)
            .unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, sent[5].id);
    }

    #[test]
    fn attachment_only_message_round_trips() {
        let (mut db, chat, a, _) = setup();
        let msg = db
            .append_message(chat, a, &Payload::attachment("blob://photo"))
            .unwrap();
        let loaded = db.get_message(msg.id).unwrap();
        assert_eq!(loaded, msg);
        assert!(loaded.payload.content.is_none());
    }

    #[test]
    fn status_only_moves_forward() {
        let (mut db, chat, a, _) = setup();
        let msg = db.append_message(chat, a, &Payload::text("hi")).unwrap();

        let up = db.update_message_status(msg.id, MessageStatus::Read).unwrap();
        assert!(up.advanced());
        assert_eq!(up.message().status, MessageStatus::Read);

        let back = db
            .update_message_status(msg.id, MessageStatus::Delivered)
            .unwrap();
        assert!(!back.advanced());
        assert_eq!(back.message().status, MessageStatus::Read);

        let same = db.update_message_status(msg.id, MessageStatus::Read).unwrap();
        assert!(!same.advanced());

        assert!(matches!(
            db.update_message_status(MessageId::new(), MessageStatus::Read),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn mark_read_skips_own_and_already_read() {
        let (mut db, chat, a, b) = setup();
        let from_a = db.append_message(chat, a, &Payload::text("1")).unwrap();
        let from_b = db.append_message(chat, b, &Payload::text("2")).unwrap();
        let from_a2 = db.append_message(chat, a, &Payload::text("3")).unwrap();
        db.update_message_status(from_a2.id, MessageStatus::Read)
            .unwrap();

        let advanced = db.mark_read_up_to_now(chat, b).unwrap();
        let ids: Vec<MessageId> = advanced.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![from_a.id]);
        assert!(advanced.iter().all(|m| m.status == MessageStatus::Read));

        assert_eq!(
            db.get_message(from_b.id).unwrap().status,
            MessageStatus::Sent
        );
        assert!(db.mark_read_up_to_now(chat, b).unwrap().is_empty());
    }
}
