//! Cached messages and per-chat cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatwave_shared::models::{ChatKind, ChatSummary, Cursor, Message, Payload};
use chatwave_shared::status::{DeliveryState, FailureReason, MessageStatus};
use chatwave_shared::types::{ChatId, MessageId, TempId, UserId};

/// A message as the client sees it: either still optimistic (temp id only)
/// or confirmed by the server (server id, possibly still carrying the temp
/// id it replaced).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<MessageId>,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub state: DeliveryState,
    /// Written by the signed-in user. Filled in when messages are read
    /// through [`ChatClient`](crate::client::ChatClient); not persisted.
    #[serde(skip)]
    pub is_user: bool,
}

impl CachedMessage {
    pub fn optimistic(chat_id: ChatId, sender_id: UserId, payload: Payload, temp_id: TempId) -> Self {
        Self {
            temp_id: Some(temp_id),
            server_id: None,
            chat_id,
            sender_id,
            payload,
            created_at: Utc::now(),
            state: DeliveryState::Sending,
            is_user: true,
        }
    }

    pub fn confirmed(message: &Message, temp_id: Option<TempId>) -> Self {
        Self {
            temp_id,
            server_id: Some(message.id),
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            payload: message.payload.clone(),
            created_at: message.created_at,
            state: DeliveryState::Confirmed(message.status),
            is_user: false,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.server_id.is_some() && self.state.is_confirmed()
    }

    pub fn has_temp_id(&self, temp_id: &TempId) -> bool {
        self.temp_id.as_ref() == Some(temp_id)
    }

    /// Unconfirmed entries that the server may still have stored. A
    /// rejection or a reported store failure rules the entry out.
    pub fn may_be_stored(&self) -> bool {
        self.server_id.is_none()
            && matches!(
                self.state,
                DeliveryState::Sending | DeliveryState::Failed(FailureReason::TimedOut)
            )
    }

    /// Move a confirmed entry's status forward. Returns `true` on change.
    pub fn advance(&mut self, status: MessageStatus) -> bool {
        match self.state {
            DeliveryState::Confirmed(current) => {
                let next = current.furthest(status);
                self.state = DeliveryState::Confirmed(next);
                next != current
            }
            _ => false,
        }
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.server_id.map(|id| Cursor {
            created_at: self.created_at,
            id,
        })
    }

    /// Display order: timestamp, then confirmed before optimistic on equal
    /// timestamps, then server id. Optimistic entries keep insertion order
    /// among themselves (the sort is stable).
    pub(crate) fn order_key(&self) -> (DateTime<Utc>, bool, Option<MessageId>) {
        (self.created_at, self.server_id.is_none(), self.server_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPresence {
    pub user_id: UserId,
    #[serde(flatten)]
    pub presence: PresenceInfo,
}

/// Chat details kept next to the messages so a chat renders without a
/// round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMeta {
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub members: Vec<MemberPresence>,
}

impl ChatMeta {
    pub fn from_summary(summary: &ChatSummary) -> Self {
        let mut meta = Self {
            kind: summary.kind,
            name: None,
            avatar: None,
            members: Vec::new(),
        };
        meta.refresh(summary);
        meta
    }

    /// Take name, avatar and membership from `summary`. Presence already
    /// known for a member is kept.
    pub fn refresh(&mut self, summary: &ChatSummary) {
        self.kind = summary.kind;
        self.name = summary.name.clone();
        self.avatar = summary.avatar.clone();
        self.members = summary
            .participants
            .iter()
            .map(|user_id| MemberPresence {
                user_id: *user_id,
                presence: self.presence_of(user_id).unwrap_or(PresenceInfo {
                    online: false,
                    last_seen: None,
                }),
            })
            .collect();
    }

    pub fn presence_of(&self, user_id: &UserId) -> Option<PresenceInfo> {
        self.members
            .iter()
            .find(|m| &m.user_id == user_id)
            .map(|m| m.presence)
    }

    /// Record a presence change for a member. Returns `true` on change.
    pub fn set_presence(&mut self, user_id: &UserId, presence: PresenceInfo) -> bool {
        match self.members.iter_mut().find(|m| &m.user_id == user_id) {
            Some(member) if member.presence != presence => {
                member.presence = presence;
                true
            }
            _ => false,
        }
    }

    /// Group name, or the other member for direct chats.
    pub fn title(&self, me: &UserId) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.members
            .iter()
            .map(|m| m.user_id)
            .find(|id| id != me)
            .map_or_else(|| self.kind.as_str().to_string(), |id| id.to_string())
    }
}

/// Everything the cache holds for one chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    pub messages: Vec<CachedMessage>,
    /// Last time the entry was brought in line with the server.
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ChatMeta>,
    #[serde(skip)]
    pub open: bool,
    #[serde(skip)]
    pub(crate) last_used: u64,
    /// Set when the slot holding this entry left the cache.
    #[serde(skip)]
    pub(crate) detached: bool,
}

impl CacheEntry {
    /// Holds messages the server has not confirmed yet.
    pub fn has_unconfirmed(&self) -> bool {
        self.messages.iter().any(|m| m.server_id.is_none())
    }

    /// Highest confirmed position, the resume point for resync.
    pub fn last_cursor(&self) -> Option<Cursor> {
        self.messages
            .iter()
            .filter_map(CachedMessage::cursor)
            .fold(None, |best: Option<Cursor>, c| match best {
                Some(b) if !b.precedes(&c) => Some(b),
                _ => Some(c),
            })
    }

    pub(crate) fn sort(&mut self) {
        self.messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    }

    pub fn position_of_temp(&self, temp_id: &TempId) -> Option<usize> {
        self.messages.iter().position(|m| m.has_temp_id(temp_id))
    }

    /// Like [`position_of_temp`](Self::position_of_temp) but only matches
    /// entries the server has not confirmed.
    pub fn position_of_unconfirmed(&self, temp_id: &TempId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.server_id.is_none() && m.has_temp_id(temp_id))
    }
}
