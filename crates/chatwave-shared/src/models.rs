//! Domain model shared by the server, the store and clients.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can travel over
//! the wire and into the client's durable mirror unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_ATTACHMENT_REF_LEN, MAX_CONTENT_CHARS, SUMMARY_CHARS};
use crate::error::ChatError;
use crate::status::MessageStatus;
use crate::types::{AttachmentRef, ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Exactly two participants, unique per unordered pair.
    Direct,
    /// One or more participants, at least one admin.
    Group,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Direct => "direct",
            ChatKind::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

/// A user's membership record within a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
}

impl Participant {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// A direct or group conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub participants: Vec<Participant>,
    /// Display name, groups only.
    pub name: Option<String>,
    /// Avatar reference, groups only.
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.user_id == user_id)
    }

    /// Every participant except `sender`.
    pub fn recipients_of(&self, sender: &UserId) -> Vec<UserId> {
        self.participants
            .iter()
            .map(|p| p.user_id)
            .filter(|id| id != sender)
            .collect()
    }

    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            participants: self.participants.iter().map(|p| p.user_id).collect(),
        }
    }
}

/// The part of a chat a client keeps for rendering its header and member
/// list offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub participants: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Text content and/or attachment reference. At least one is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            attachment: None,
        }
    }

    pub fn attachment(reference: impl Into<String>) -> Self {
        Self {
            content: None,
            attachment: Some(AttachmentRef(reference.into())),
        }
    }

    /// Collapse blank text to `None` so that `"   "` counts as absent.
    pub fn normalized(self) -> Self {
        Self {
            content: self.content.filter(|c| !c.trim().is_empty()),
            attachment: self.attachment.filter(|a| !a.0.trim().is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        let has_text = self
            .content
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());
        let has_attachment = self
            .attachment
            .as_ref()
            .is_some_and(|a| !a.0.trim().is_empty());
        !has_text && !has_attachment
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.is_empty() {
            return Err(ChatError::Validation(
                "message needs text content or an attachment".into(),
            ));
        }
        if let Some(content) = &self.content {
            let chars = content.chars().count();
            if chars > MAX_CONTENT_CHARS {
                return Err(ChatError::Validation(format!(
                    "content is {chars} characters (max {MAX_CONTENT_CHARS})"
                )));
            }
        }
        if let Some(attachment) = &self.attachment {
            if attachment.0.len() > MAX_ATTACHMENT_REF_LEN {
                return Err(ChatError::Validation("attachment reference too long".into()));
            }
        }
        Ok(())
    }

    /// Short preview used by push notifications.
    pub fn summary(&self) -> String {
        match self.content.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(text) if text.chars().count() > SUMMARY_CHARS => {
                let mut cut: String = text.chars().take(SUMMARY_CHARS).collect();
                cut.push('…');
                cut
            }
            Some(text) => text.to_string(),
            None => "[attachment]".to_string(),
        }
    }
}

/// A message as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub payload: Payload,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Position of this message in its chat's log.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Exclusive pagination cursor into a chat's log: everything strictly after
/// `(created_at, id)` is returned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: MessageId,
}

impl Cursor {
    /// Total order used by the store and the client cache. Byte order of a
    /// UUID matches the order of its lowercase text form stored in SQLite.
    pub fn precedes(&self, other: &Cursor) -> bool {
        (self.created_at, self.id) < (other.created_at, other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_rejected() {
        assert!(Payload::default().validate().is_err());
        assert!(Payload::text("   ").validate().is_err());
        assert!(Payload::attachment("").validate().is_err());
        assert!(Payload::text("hello").validate().is_ok());
        assert!(Payload::attachment("blob://42").validate().is_ok());
    }

    #[test]
    fn oversized_content_is_rejected() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            Payload::text(long).validate(),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn summary_truncates_and_labels_attachments() {
        let long = "a".repeat(SUMMARY_CHARS + 20);
        let summary = Payload::text(long).summary();
        assert_eq!(summary.chars().count(), SUMMARY_CHARS + 1);
        assert_eq!(Payload::attachment("blob://1").summary(), "[attachment]");
    }

    #[test]
    fn message_payload_is_flattened_on_the_wire() {
        let msg = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            payload: Payload::text("hello"),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"], "hello");
        assert!(value.get("attachment").is_none());
        assert_eq!(value["status"], "sent");
    }
}
