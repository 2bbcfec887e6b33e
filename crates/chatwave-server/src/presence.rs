//! Presence tracking.
//!
//! Maps each user to the set of live sessions they hold. A user is online
//! iff at least one session remains. "Last seen" is stamped only when the
//! final session goes away.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use chatwave_shared::types::{SessionId, UserId};

#[derive(Debug, Default)]
struct PresenceState {
    sessions: HashMap<UserId, HashSet<SessionId>>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

/// Concurrent user → sessions map. `mark_online` / `mark_offline` are the
/// only mutation points; every read returns an owned copy.
#[derive(Clone, Default)]
pub struct PresenceTracker {
    inner: Arc<RwLock<PresenceState>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns `true` if the user just came online.
    pub async fn mark_online(&self, user_id: UserId, session_id: SessionId) -> bool {
        let mut state = self.inner.write().await;
        let sessions = state.sessions.entry(user_id).or_default();
        let was_offline = sessions.is_empty();
        sessions.insert(session_id);

        debug!(
            user = %user_id,
            session = %session_id,
            sessions = sessions.len(),
            "session online"
        );
        was_offline
    }

    /// Drop a session. Returns the last-seen timestamp if this was the
    /// user's final session, `None` while other sessions remain.
    pub async fn mark_offline(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Option<DateTime<Utc>> {
        let mut state = self.inner.write().await;
        let now_empty = match state.sessions.get_mut(&user_id) {
            Some(sessions) => {
                if !sessions.remove(&session_id) {
                    return None;
                }
                sessions.is_empty()
            }
            None => return None,
        };

        if !now_empty {
            return None;
        }

        state.sessions.remove(&user_id);
        let seen = Utc::now();
        state.last_seen.insert(user_id, seen);
        debug!(user = %user_id, "user fully offline");
        Some(seen)
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(user_id)
            .is_some_and(|s| !s.is_empty())
    }

    pub async fn sessions_of(&self, user_id: &UserId) -> Vec<SessionId> {
        self.inner
            .read()
            .await
            .sessions
            .get(user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_seen.get(user_id).copied()
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn online_until_last_session_leaves() {
        let presence = PresenceTracker::new();
        let user = UserId::new();
        let (phone, laptop) = (SessionId::new(), SessionId::new());

        assert!(presence.mark_online(user, phone).await);
        assert!(!presence.mark_online(user, laptop).await);
        assert!(presence.is_online(&user).await);
        assert_eq!(presence.sessions_of(&user).await.len(), 2);

        assert!(presence.mark_offline(user, phone).await.is_none());
        assert!(presence.is_online(&user).await);
        assert!(presence.last_seen(&user).await.is_none());

        let seen = presence.mark_offline(user, laptop).await;
        assert!(seen.is_some());
        assert!(!presence.is_online(&user).await);
        assert_eq!(presence.last_seen(&user).await, seen);
        assert_eq!(presence.online_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_session_offline_is_noop() {
        let presence = PresenceTracker::new();
        let user = UserId::new();
        let session = SessionId::new();
        assert!(presence.mark_offline(user, session).await.is_none());

        presence.mark_online(user, session).await;
        assert!(presence.mark_offline(user, SessionId::new()).await.is_none());
        assert!(presence.is_online(&user).await);
    }
}
