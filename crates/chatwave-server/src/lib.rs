//! # chatwave-server
//!
//! Real-time delivery gateway for Chatwave.
//!
//! - **WebSocket gateway** (`/ws`): authenticated sessions, chat rooms,
//!   message send with acknowledgments, status changes, typing indicators
//!   and presence
//! - **History API** (`/chats/{chat_id}/messages`): cursor-paginated reads
//!   used by clients to resync after a gap
//! - **Per-IP and per-user rate limiting**

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod presence;
pub mod rate_limit;
pub mod rooms;
pub mod sessions;
pub mod store;
pub mod ws;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use gateway::{Gateway, Session};
