//! Store-level records and column conversion helpers.
//!
//! Domain structs (`Chat`, `Message`, ...) live in `chatwave-shared` and are
//! re-exported here; this module only adds what is specific to persistence.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use chatwave_shared::models::{Chat, ChatKind, Cursor, Message, Participant, Payload, Role};
use chatwave_shared::status::MessageStatus;
use chatwave_shared::types::ChatId;

// ---------------------------------------------------------------------------
// Status update outcome
// ---------------------------------------------------------------------------

/// Result of a forward-only status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The status moved forward; carries the updated message.
    Advanced(Message),
    /// The requested status was not an advance; carries the message as is.
    Unchanged(Message),
}

impl StatusUpdate {
    pub fn advanced(&self) -> bool {
        matches!(self, StatusUpdate::Advanced(_))
    }

    pub fn message(&self) -> &Message {
        match self {
            StatusUpdate::Advanced(m) | StatusUpdate::Unchanged(m) => m,
        }
    }
}

// ---------------------------------------------------------------------------
// Client mirror
// ---------------------------------------------------------------------------

/// One persisted cache snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRecord {
    pub chat_id: ChatId,
    /// JSON produced by the client cache. Opaque to the store.
    pub snapshot: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(idx: usize, us: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {us}").into(),
        )
    })
}

pub(crate) fn parse_uuid(idx: usize, text: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn status_rank(status: MessageStatus) -> i64 {
    match status {
        MessageStatus::Sent => 0,
        MessageStatus::Delivered => 1,
        MessageStatus::Read => 2,
    }
}

pub(crate) fn status_from_rank(idx: usize, rank: i64) -> rusqlite::Result<MessageStatus> {
    match rank {
        0 => Ok(MessageStatus::Sent),
        1 => Ok(MessageStatus::Delivered),
        2 => Ok(MessageStatus::Read),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Integer,
            format!("unknown status rank: {other}").into(),
        )),
    }
}
