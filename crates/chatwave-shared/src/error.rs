use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced across the delivery pipeline.
///
/// Every variant maps to a stable [`ErrorCode`] so that failure
/// acknowledgments can be interpreted by clients without parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Bad or expired credential. The connection is refused.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The caller is not a participant of the chat.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request is malformed (e.g. empty message with no attachment).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Chat or message does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence is temporarily unavailable. Not retried server-side.
    #[error("Store temporarily unavailable: {0}")]
    TransientStore(String),

    /// Client-observed: a broadcast or ack never arrived.
    #[error("Network partition: {0}")]
    NetworkPartition(String),

    /// The sender exceeded the per-user send rate.
    #[error("Rate limit exceeded")]
    RateLimited,
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Authentication(_) => ErrorCode::Authentication,
            ChatError::Forbidden(_) => ErrorCode::Forbidden,
            ChatError::Validation(_) => ErrorCode::Validation,
            ChatError::NotFound(_) => ErrorCode::NotFound,
            ChatError::TransientStore(_) => ErrorCode::TransientStore,
            ChatError::NetworkPartition(_) => ErrorCode::NetworkPartition,
            ChatError::RateLimited => ErrorCode::RateLimited,
        }
    }

    /// Rebuild an error from its wire form.
    pub fn from_wire(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::Authentication => ChatError::Authentication(message),
            ErrorCode::Forbidden => ChatError::Forbidden(message),
            ErrorCode::Validation => ChatError::Validation(message),
            ErrorCode::NotFound => ChatError::NotFound(message),
            ErrorCode::TransientStore => ChatError::TransientStore(message),
            ErrorCode::NetworkPartition => ChatError::NetworkPartition(message),
            ErrorCode::RateLimited => ChatError::RateLimited,
        }
    }
}

/// Stable, serializable error discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Authentication,
    Forbidden,
    Validation,
    NotFound,
    TransientStore,
    NetworkPartition,
    RateLimited,
}

impl ErrorCode {
    /// Whether the request was refused on its merits (as opposed to the
    /// infrastructure being unavailable).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ErrorCode::Authentication
                | ErrorCode::Forbidden
                | ErrorCode::Validation
                | ErrorCode::NotFound
        )
    }
}
