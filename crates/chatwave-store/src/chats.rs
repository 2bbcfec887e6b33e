//! Chats and participants.
//!
//! Membership administration is owned by an external service; the helpers
//! here exist so the delivery core can answer "who is in this chat" and so
//! chats can be bootstrapped.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use chatwave_shared::types::{ChatId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{from_micros, parse_uuid, to_micros, Chat, ChatKind, Participant, Role};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the direct chat between `a` and `b`, creating it if needed.
    ///
    /// Direct chats are unique per unordered pair, so `(a, b)` and `(b, a)`
    /// resolve to the same chat.
    pub fn get_or_create_direct_chat(&mut self, a: UserId, b: UserId) -> Result<Chat> {
        if a == b {
            return Err(StoreError::Invalid(
                "a direct chat needs two distinct participants".into(),
            ));
        }

        let key = direct_key(a, b);
        let tx = self.conn_mut().transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM chats WHERE direct_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let chat_id = match existing {
            Some(id) => ChatId(uuid::Uuid::parse_str(&id)?),
            None => {
                let id = ChatId::new();
                let now = to_micros(Utc::now());
                tx.execute(
                    "INSERT INTO chats (id, kind, direct_key, name, avatar, created_at_us, last_activity_us)
                     VALUES (?1, 'direct', ?2, NULL, NULL, ?3, ?3)",
                    params![id.to_string(), key, now],
                )?;
                for user in [a, b] {
                    tx.execute(
                        "INSERT INTO participants (chat_id, user_id, role, joined_at_us)
                         VALUES (?1, ?2, 'member', ?3)",
                        params![id.to_string(), user.to_string(), now],
                    )?;
                }
                tracing::debug!(chat = %id, "created direct chat");
                id
            }
        };

        tx.commit()?;
        self.get_chat(chat_id)
    }

    /// Create a group chat. The creator becomes its admin.
    pub fn create_group_chat(
        &mut self,
        creator: UserId,
        name: &str,
        avatar: Option<&str>,
        members: &[UserId],
    ) -> Result<Chat> {
        let id = ChatId::new();
        let now = to_micros(Utc::now());
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO chats (id, kind, direct_key, name, avatar, created_at_us, last_activity_us)
             VALUES (?1, 'group', NULL, ?2, ?3, ?4, ?4)",
            params![id.to_string(), name, avatar, now],
        )?;
        tx.execute(
            "INSERT INTO participants (chat_id, user_id, role, joined_at_us)
             VALUES (?1, ?2, 'admin', ?3)",
            params![id.to_string(), creator.to_string(), now],
        )?;
        for member in members.iter().filter(|m| **m != creator) {
            tx.execute(
                "INSERT OR IGNORE INTO participants (chat_id, user_id, role, joined_at_us)
                 VALUES (?1, ?2, 'member', ?3)",
                params![id.to_string(), member.to_string(), now],
            )?;
        }

        tx.commit()?;
        tracing::debug!(chat = %id, members = members.len(), "created group chat");
        self.get_chat(id)
    }

    /// Add a participant to a group chat. Returns `false` if already present.
    pub fn add_participant(&self, chat_id: ChatId, user_id: UserId, role: Role) -> Result<bool> {
        let chat = self.get_chat(chat_id)?;
        if chat.kind == ChatKind::Direct {
            return Err(StoreError::Invalid(
                "direct chats have a fixed participant pair".into(),
            ));
        }
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO participants (chat_id, user_id, role, joined_at_us)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chat_id.to_string(),
                user_id.to_string(),
                role_to_str(role),
                to_micros(Utc::now()),
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a chat with its participants.
    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        type ChatRow = (String, Option<String>, Option<String>, i64, i64);

        let (kind, name, avatar, created_us, activity_us): ChatRow = self
            .conn()
            .query_row(
                "SELECT kind, name, avatar, created_at_us, last_activity_us
                 FROM chats WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .map_err(StoreError::from_query)?;

        let kind = match kind.as_str() {
            "direct" => ChatKind::Direct,
            "group" => ChatKind::Group,
            other => return Err(StoreError::Invalid(format!("unknown chat kind: {other}"))),
        };

        Ok(Chat {
            id,
            kind,
            participants: self.participants(id)?,
            name,
            avatar,
            created_at: from_micros(3, created_us)?,
            last_activity_at: from_micros(4, activity_us)?,
        })
    }

    /// Participants of a chat, admins first.
    pub fn participants(&self, chat_id: ChatId) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, role FROM participants
             WHERE chat_id = ?1
             ORDER BY role ASC, joined_at_us ASC, user_id ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], |row| {
            let user: String = row.get(0)?;
            let role: String = row.get(1)?;
            Ok(Participant {
                user_id: UserId(parse_uuid(0, &user)?),
                role: if role == "admin" { Role::Admin } else { Role::Member },
            })
        })?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    /// Every chat `user_id` participates in, most recently active first.
    pub fn chat_ids_for_user(&self, user_id: UserId) -> Result<Vec<ChatId>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM chats c
             JOIN participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.last_activity_us DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id: String = row.get(0)?;
            Ok(ChatId(parse_uuid(0, &id)?))
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn is_participant(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Canonical key of an unordered user pair.
fn direct_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Member => "member",
    }
}
