//! Broadcast rooms.
//!
//! A set-valued index from chat to subscribed sessions, plus the reverse
//! index so a disconnecting session can be removed from every room it was
//! in. Broadcasting is a pure lookup: callers take a copy of the member
//! list and send outside the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use chatwave_shared::types::{ChatId, SessionId};

#[derive(Debug, Default)]
struct RoomState {
    members: HashMap<ChatId, HashSet<SessionId>>,
    joined: HashMap<SessionId, HashSet<ChatId>>,
}

#[derive(Clone, Default)]
pub struct RoomIndex {
    inner: Arc<RwLock<RoomState>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a chat. Returns `false` if already subscribed.
    pub async fn join(&self, chat_id: ChatId, session_id: SessionId) -> bool {
        let mut state = self.inner.write().await;
        let inserted = state.members.entry(chat_id).or_default().insert(session_id);
        state.joined.entry(session_id).or_default().insert(chat_id);

        if inserted {
            debug!(
                room = %chat_id.to_room(),
                session = %session_id,
                members = state.members.get(&chat_id).map_or(0, HashSet::len),
                "session joined room"
            );
        }
        inserted
    }

    /// Unsubscribe a session from a chat. Empty rooms are removed.
    pub async fn leave(&self, chat_id: ChatId, session_id: SessionId) -> bool {
        let mut state = self.inner.write().await;
        let removed = match state.members.get_mut(&chat_id) {
            Some(members) => members.remove(&session_id),
            None => false,
        };
        if state.members.get(&chat_id).is_some_and(HashSet::is_empty) {
            state.members.remove(&chat_id);
        }
        if let Some(chats) = state.joined.get_mut(&session_id) {
            chats.remove(&chat_id);
            if chats.is_empty() {
                state.joined.remove(&session_id);
            }
        }
        removed
    }

    /// Remove a session from every room. Returns the chats it was in.
    pub async fn leave_all(&self, session_id: SessionId) -> Vec<ChatId> {
        let mut state = self.inner.write().await;
        let chats: Vec<ChatId> = state
            .joined
            .remove(&session_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for chat_id in &chats {
            let now_empty = match state.members.get_mut(chat_id) {
                Some(members) => {
                    members.remove(&session_id);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.members.remove(chat_id);
            }
        }
        chats
    }

    /// Snapshot of the sessions subscribed to `chat_id`.
    pub async fn members(&self, chat_id: &ChatId) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .members
            .get(chat_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_member(&self, chat_id: &ChatId, session_id: &SessionId) -> bool {
        self.inner
            .read()
            .await
            .members
            .get(chat_id)
            .is_some_and(|m| m.contains(session_id))
    }

    pub async fn rooms_of(&self, session_id: &SessionId) -> Vec<ChatId> {
        self.inner
            .read()
            .await
            .joined
            .get(session_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.members.len()
    }
}
