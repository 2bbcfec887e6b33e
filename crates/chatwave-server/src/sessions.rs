//! Live session registry.
//!
//! Each connected WebSocket owns a bounded outbound queue. The registry maps
//! session ids to those queues so the gateway can address a session without
//! knowing anything about the socket behind it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use chatwave_shared::protocol::ServerEvent;
use chatwave_shared::types::{SessionId, UserId};

#[derive(Debug, Clone)]
struct SessionHandle {
    user_id: UserId,
    outbound: mpsc::Sender<ServerEvent>,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        session_id: SessionId,
        user_id: UserId,
        outbound: mpsc::Sender<ServerEvent>,
    ) {
        self.sessions
            .write()
            .await
            .insert(session_id, SessionHandle { user_id, outbound });
    }

    pub async fn unregister(&self, session_id: &SessionId) -> Option<UserId> {
        self.sessions
            .write()
            .await
            .remove(session_id)
            .map(|h| h.user_id)
    }

    pub async fn user_of(&self, session_id: &SessionId) -> Option<UserId> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|h| h.user_id)
    }

    /// Queue an event for one session without waiting.
    ///
    /// Returns `false` when the session is gone or its queue is full; the
    /// event is dropped for that session only.
    pub async fn send_to(&self, session_id: &SessionId, event: ServerEvent) -> bool {
        let outbound = match self.sessions.read().await.get(session_id) {
            Some(handle) => handle.outbound.clone(),
            None => return false,
        };

        match outbound.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %session_id, "Outbound queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session = %session_id, "Outbound queue closed");
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
