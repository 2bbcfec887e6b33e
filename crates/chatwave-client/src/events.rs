use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use chatwave_shared::error::ErrorCode;
use chatwave_shared::status::FailureReason;
use chatwave_shared::types::{ChatId, TempId, UserId};

pub const NOTIFICATION_BUFFER: usize = 256;

/// What the client tells its UI layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientNotification {
    /// The cached list of a chat changed; re-read it with `messages`.
    MessagesChanged { chat_id: ChatId },
    MessageFailed {
        chat_id: ChatId,
        temp_id: TempId,
        reason: FailureReason,
    },
    PresenceChanged {
        user_id: UserId,
        online: bool,
        last_seen: Option<DateTime<Utc>>,
    },
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        active: bool,
    },
    ConnectionChanged { connected: bool },
    Error { code: ErrorCode, message: String },
}

/// Send to all current subscribers. Having none is not an error.
pub fn emit(tx: &broadcast::Sender<ClientNotification>, notification: ClientNotification) {
    if let Err(e) = tx.send(notification) {
        tracing::trace!(kind = ?e.0, "No notification subscribers");
    }
}
