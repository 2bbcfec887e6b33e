//! Durable mirror of the chat cache.
//!
//! The cache never waits on disk. Mutations send a snapshot to a
//! [`MirrorWriter`] task which applies it on the blocking pool; a failed
//! write is logged and the in-memory state stays authoritative.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use chatwave_shared::types::ChatId;
use chatwave_store::Database;

use crate::entry::CacheEntry;
use crate::error::ClientError;

pub trait LocalMirror: Send + Sync {
    fn save(&self, chat_id: ChatId, snapshot: &str) -> Result<(), ClientError>;
    fn load(&self, chat_id: ChatId) -> Result<Option<String>, ClientError>;
    fn delete(&self, chat_id: ChatId) -> Result<(), ClientError>;
}

/// Mirror stored in the client's SQLite database.
#[derive(Clone)]
pub struct SqliteMirror {
    db: Arc<Mutex<Database>>,
}

impl SqliteMirror {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open the mirror in the platform data directory.
    pub fn open_default() -> Result<Self, ClientError> {
        Ok(Self::new(Database::open_default()?))
    }

    pub fn open_at(path: &Path) -> Result<Self, ClientError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self, ClientError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn chat_ids(&self) -> Result<Vec<ChatId>, ClientError> {
        Ok(self.db.lock().list_mirrors()?)
    }
}

impl LocalMirror for SqliteMirror {
    fn save(&self, chat_id: ChatId, snapshot: &str) -> Result<(), ClientError> {
        self.db.lock().save_mirror(chat_id, snapshot, Utc::now())?;
        Ok(())
    }

    fn load(&self, chat_id: ChatId) -> Result<Option<String>, ClientError> {
        Ok(self.db.lock().load_mirror(chat_id)?.map(|r| r.snapshot))
    }

    fn delete(&self, chat_id: ChatId) -> Result<(), ClientError> {
        self.db.lock().delete_mirror(chat_id)?;
        Ok(())
    }
}

pub fn encode_snapshot(entry: &CacheEntry) -> Result<String, ClientError> {
    Ok(serde_json::to_string(entry)?)
}

pub fn decode_snapshot(raw: &str) -> Result<CacheEntry, ClientError> {
    Ok(serde_json::from_str(raw)?)
}

// ---------------------------------------------------------------------------
// Background writer
// ---------------------------------------------------------------------------

enum MirrorOp {
    Save(ChatId, String),
    Delete(ChatId),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background mirror task. Cheap to clone.
#[derive(Clone)]
pub struct MirrorWriter {
    tx: mpsc::UnboundedSender<MirrorOp>,
    mirror: Arc<dyn LocalMirror>,
}

impl MirrorWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(mirror: Arc<dyn LocalMirror>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorOp>();
        let backend = mirror.clone();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let (chat_id, result) = match op {
                    MirrorOp::Save(chat_id, snapshot) => {
                        let backend = backend.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            backend.save(chat_id, &snapshot)
                        })
                        .await;
                        (chat_id, result)
                    }
                    MirrorOp::Delete(chat_id) => {
                        let backend = backend.clone();
                        let result =
                            tokio::task::spawn_blocking(move || backend.delete(chat_id)).await;
                        (chat_id, result)
                    }
                    MirrorOp::Flush(done) => {
                        let _ = done.send(());
                        continue;
                    }
                };

                match result {
                    Ok(Ok(())) => debug!(chat = %chat_id, "Mirror updated"),
                    Ok(Err(e)) => warn!(chat = %chat_id, error = %e, "Mirror write failed"),
                    Err(e) => warn!(chat = %chat_id, error = %e, "Mirror task panicked"),
                }
            }
            debug!("Mirror writer stopped");
        });

        Self { tx, mirror }
    }

    pub fn save(&self, chat_id: ChatId, entry: &CacheEntry) {
        match encode_snapshot(entry) {
            Ok(snapshot) => {
                if self.tx.send(MirrorOp::Save(chat_id, snapshot)).is_err() {
                    warn!(chat = %chat_id, "Mirror writer gone, snapshot dropped");
                }
            }
            Err(e) => warn!(chat = %chat_id, error = %e, "Snapshot encoding failed"),
        }
    }

    pub fn delete(&self, chat_id: ChatId) {
        if self.tx.send(MirrorOp::Delete(chat_id)).is_err() {
            warn!(chat = %chat_id, "Mirror writer gone, delete dropped");
        }
    }

    /// Load a snapshot synchronously on the blocking pool.
    pub async fn load(&self, chat_id: ChatId) -> Option<CacheEntry> {
        let mirror = self.mirror.clone();
        let raw = match tokio::task::spawn_blocking(move || mirror.load(chat_id)).await {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                warn!(chat = %chat_id, error = %e, "Mirror read failed");
                return None;
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Mirror task panicked");
                return None;
            }
        };

        match decode_snapshot(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Discarding unreadable snapshot");
                None
            }
        }
    }

    /// Wait until every previously queued write has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(MirrorOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
