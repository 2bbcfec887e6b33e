//! # chatwave-shared
//!
//! Types shared by every Chatwave crate: identifiers, the domain model of
//! chats and messages, the forward-only status machine, the JSON wire
//! protocol spoken over the real-time connection, and the error taxonomy
//! surfaced to clients.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod status;
pub mod types;

pub use error::{ChatError, ErrorCode};
pub use models::*;
pub use status::{DeliveryState, FailureReason, MessageStatus};
pub use types::{AttachmentRef, ChatId, MessageId, SessionId, TempId, UserId};
