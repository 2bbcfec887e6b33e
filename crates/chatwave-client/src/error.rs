use thiserror::Error;

use chatwave_shared::error::ChatError;
use chatwave_store::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Message cannot be resent: {0}")]
    NotResendable(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
