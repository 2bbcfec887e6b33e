//! # chatwave-store
//!
//! SQLite persistence for Chatwave.
//!
//! On the server it is the durable, ordered, per-chat message log and the
//! single source of truth for message status. On clients the same crate
//! backs the durable mirror of the chat cache. The crate exposes a
//! synchronous `Database` handle that wraps a `rusqlite::Connection` and
//! provides typed helpers for every table; async callers are expected to
//! move calls onto a blocking thread.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod mirror;
pub mod models;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
