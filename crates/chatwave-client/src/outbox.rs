//! In-flight sends awaiting acknowledgment.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use chatwave_shared::models::Payload;
use chatwave_shared::types::{ChatId, TempId, UserId};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Payload,
    pub issued_at: Instant,
}

#[derive(Default)]
pub struct PendingSends {
    inner: Mutex<HashMap<TempId, PendingSend>>,
}

impl PendingSends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, temp_id: TempId, chat_id: ChatId, sender_id: UserId, payload: Payload) {
        self.inner.lock().insert(
            temp_id,
            PendingSend {
                chat_id,
                sender_id,
                payload,
                issued_at: Instant::now(),
            },
        );
    }

    /// Remove and return the entry for an acknowledged send.
    pub fn complete(&self, temp_id: &TempId) -> Option<PendingSend> {
        self.inner.lock().remove(temp_id)
    }

    /// Remove every entry older than `timeout` and return them.
    pub fn expire(&self, timeout: Duration) -> Vec<(TempId, PendingSend)> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let overdue: Vec<TempId> = inner
            .iter()
            .filter(|(_, p)| now.duration_since(p.issued_at) >= timeout)
            .map(|(t, _)| t.clone())
            .collect();
        overdue
            .into_iter()
            .filter_map(|t| inner.remove(&t).map(|p| (t, p)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_removes_entry() {
        let pending = PendingSends::new();
        let temp = TempId::generate();
        pending.track(temp.clone(), ChatId::new(), UserId::new(), Payload::text("hi"));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.complete(&temp).unwrap().payload, Payload::text("hi"));
        assert!(pending.complete(&temp).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn expire_only_takes_overdue() {
        let pending = PendingSends::new();
        let old = TempId::generate();
        let fresh = TempId::generate();
        pending.track(old.clone(), ChatId::new(), UserId::new(), Payload::text("a"));
        pending.inner.lock().get_mut(&old).unwrap().issued_at =
            Instant::now() - Duration::from_secs(60);
        pending.track(fresh.clone(), ChatId::new(), UserId::new(), Payload::text("b"));

        let expired = pending.expire(Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, old);
        assert!(pending.inner.lock().contains_key(&fresh));
        assert!(pending.expire(Duration::from_secs(30)).is_empty());
    }
}
