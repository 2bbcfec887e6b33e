use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCode};
use crate::models::{Message, Payload};
use crate::status::MessageStatus;
use crate::types::{ChatId, MessageId, SessionId, TempId, UserId};

/// Events sent by a client over the real-time connection.
///
/// Encoded as `{"event": "<snake_case name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChat { chat_id: ChatId },
    LeaveChat { chat_id: ChatId },
    SendMessage(SendRequest),
    MessageStatusUpdate {
        message_id: MessageId,
        status: MessageStatus,
        chat_id: ChatId,
    },
    /// The user has viewed the chat; everything from others becomes read.
    MarkChatRead { chat_id: ChatId },
    TypingStart { chat_id: ChatId },
    TypingStop { chat_id: ChatId },
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Ready {
        session_id: SessionId,
        user_id: UserId,
        chats: Vec<ChatId>,
    },
    SendAck(SendAck),
    NewMessage(MessageEnvelope),
    MessageStatusUpdated {
        message_id: MessageId,
        chat_id: ChatId,
        status: MessageStatus,
    },
    UserTyping { chat_id: ChatId, user_id: UserId },
    UserStoppedTyping { chat_id: ChatId, user_id: UserId },
    UserOnline { user_id: UserId },
    UserOffline {
        user_id: UserId,
        last_seen: DateTime<Utc>,
    },
    Error { code: ErrorCode, message: String },
}

/// Body of a `send_message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendRequest {
    pub chat_id: ChatId,
    #[serde(flatten)]
    pub payload: Payload,
    pub client_temp_id: TempId,
}

/// A confirmed message plus the temporary id of the optimistic copy it
/// replaces, when the origin client supplied one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<TempId>,
}

/// Acknowledgment returned to the sending session only.
///
/// Success acks carry the confirmed identity, status and timestamp; failure
/// acks carry the error. Both always echo `client_temp_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendAck {
    pub success: bool,
    pub client_temp_id: TempId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
    /// Full confirmed copy, so the sender can reconcile without its own
    /// broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckError {
    pub code: ErrorCode,
    pub message: String,
}

impl SendAck {
    pub fn accepted(message: &Message, client_temp_id: TempId) -> Self {
        Self {
            success: true,
            client_temp_id,
            message_id: Some(message.id),
            status: Some(message.status),
            timestamp: Some(message.created_at),
            error: None,
            message: Some(message.clone()),
        }
    }

    pub fn rejected(client_temp_id: TempId, error: &ChatError) -> Self {
        Self {
            success: false,
            client_temp_id,
            message_id: None,
            status: None,
            timestamp: None,
            error: Some(AckError {
                code: error.code(),
                message: error.to_string(),
            }),
            message: None,
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn error(err: &ChatError) -> Self {
        ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_wire_shape() {
        let chat_id = ChatId::new();
        let raw = format!(
            r#"{{"event":"send_message","data":{{"chat_id":"{chat_id}","content":"hi","client_temp_id":"temp-1"}}}}"#
        );
        let event = ClientEvent::from_json(&raw).unwrap();
        match event {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.chat_id, chat_id);
                assert_eq!(req.payload, Payload::text("hi"));
                assert_eq!(req.client_temp_id, TempId::from("temp-1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn failed_ack_omits_confirmation_fields() {
        let ack = SendAck::rejected(
            TempId::from("temp-9"),
            &ChatError::Validation("empty".into()),
        );
        let value = serde_json::to_value(&ack).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["client_temp_id"], "temp-9");
        assert_eq!(value["error"]["code"], "validation");
        assert!(value.get("message_id").is_none());
    }

    #[test]
    fn new_message_carries_temp_id_alongside_message_fields() {
        let message = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            payload: Payload::text("hello"),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        };
        let event = ServerEvent::NewMessage(MessageEnvelope {
            message: message.clone(),
            client_temp_id: Some(TempId::from("temp-abc")),
        });
        let json = event.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "new_message");
        assert_eq!(value["data"]["content"], "hello");
        assert_eq!(value["data"]["client_temp_id"], "temp-abc");

        match ServerEvent::from_json(&json).unwrap() {
            ServerEvent::NewMessage(env) => assert_eq!(env.message, message),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
