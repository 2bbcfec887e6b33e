//! # chatwave-client
//!
//! Client side of Chatwave: an in-memory chat cache that shows messages the
//! moment they are typed, reconciles them with server confirmations, keeps
//! a durable mirror on disk, and resyncs open chats after gaps.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod entry;
pub mod error;
pub mod events;
pub mod history;
pub mod mirror;
pub mod outbox;
pub mod reconcile;
pub mod sweeper;

pub use cache::ClientCache;
pub use client::ChatClient;
pub use config::ClientConfig;
pub use entry::{CacheEntry, CachedMessage, ChatMeta, MemberPresence, PresenceInfo};
pub use error::ClientError;
pub use events::ClientNotification;
pub use history::{HistorySource, HttpHistory};
pub use mirror::{LocalMirror, MirrorWriter, SqliteMirror};
pub use reconcile::MergeOutcome;
pub use sweeper::{ResyncSweeper, SweepReport};
