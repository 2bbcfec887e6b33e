//! Background resync of open chats.
//!
//! Every tick, each open chat whose cache is older than the staleness
//! threshold is refetched from its last confirmed cursor and merged through
//! the same idempotent path as live broadcasts. A failed fetch is logged and
//! the chat stays stale, so the next tick retries it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatwave_shared::types::ChatId;

use crate::cache::ClientCache;
use crate::error::ClientError;
use crate::history::HistorySource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub chats_synced: usize,
    pub messages_merged: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct ResyncSweeper {
    cache: Arc<ClientCache>,
    history: Arc<dyn HistorySource>,
    stale_after: Duration,
    page_size: u32,
}

impl ResyncSweeper {
    pub fn new(
        cache: Arc<ClientCache>,
        history: Arc<dyn HistorySource>,
        stale_after: Duration,
        page_size: u32,
    ) -> Self {
        Self {
            cache,
            history,
            stale_after,
            page_size: page_size.max(1),
        }
    }

    fn is_stale(&self, chat_id: ChatId) -> bool {
        self.cache
            .age(chat_id)
            .map_or(true, |age| age >= self.stale_after)
    }

    /// Sync every open chat that is stale, or all open chats if `force`.
    pub async fn sweep_now(&self, force: bool) -> SweepReport {
        let due: Vec<ChatId> = self
            .cache
            .open_chats()
            .into_iter()
            .filter(|chat| force || self.is_stale(*chat))
            .collect();

        let mut report = SweepReport::default();
        if due.is_empty() {
            return report;
        }

        let results = join_all(due.iter().map(|chat| self.sync_chat(*chat))).await;
        for (chat, result) in due.iter().zip(results) {
            match result {
                Ok(merged) => {
                    report.chats_synced += 1;
                    report.messages_merged += merged;
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(chat = %chat, error = %e, "Resync failed, will retry");
                }
            }
        }

        debug!(
            synced = report.chats_synced,
            merged = report.messages_merged,
            failures = report.failures,
            "Sweep finished"
        );
        report
    }

    /// Page forward from the last confirmed cursor until the server has
    /// nothing newer, fetching chat details first if none are cached.
    /// Returns the number of merges that changed the cache.
    pub async fn sync_chat(&self, chat_id: ChatId) -> Result<usize, ClientError> {
        if self.cache.meta(chat_id).is_none() {
            match self.history.fetch_chat(chat_id).await {
                Ok(Some(summary)) => self.cache.set_meta(chat_id, &summary),
                Ok(None) => {}
                Err(e) => debug!(chat = %chat_id, error = %e, "Chat details unavailable"),
            }
        }

        let mut cursor = self.cache.last_cursor(chat_id);
        let mut merged = 0;
        let mut previous = 0;

        loop {
            let page = self
                .history
                .fetch_since(chat_id, cursor, self.page_size)
                .await?;

            for message in &page {
                if self.cache.reconcile(chat_id, None, message).changed() {
                    merged += 1;
                }
            }

            // The server may serve fewer than requested per page, so a page
            // is final only if it is also shorter than the one before it.
            let last_page = page.len() < self.page_size as usize && page.len() < previous;
            match page.last() {
                Some(last) if !last_page => cursor = Some(last.cursor()),
                _ => break,
            }
            previous = page.len();
        }

        self.cache.touch_synced(chat_id);
        Ok(merged)
    }

    /// Run the sweep loop until the returned handle is aborted.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Resync sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_now(false).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatwave_shared::error::ChatError;
    use chatwave_shared::models::{ChatKind, ChatSummary, Cursor, Message, Payload};
    use chatwave_shared::status::MessageStatus;
    use chatwave_shared::types::{MessageId, UserId};
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex;

    /// Serves a fixed log and records requested cursors. Pages never
    /// exceed `cap`, whatever the caller asks for.
    struct FakeHistory {
        log: Vec<Message>,
        calls: Mutex<Vec<Option<Cursor>>>,
        fail: bool,
        cap: u32,
        summary: Option<ChatSummary>,
    }

    impl FakeHistory {
        fn serving(log: Vec<Message>) -> Self {
            Self {
                log,
                calls: Mutex::new(Vec::new()),
                fail: false,
                cap: u32::MAX,
                summary: None,
            }
        }
    }

    #[async_trait]
    impl HistorySource for FakeHistory {
        async fn fetch_since(
            &self,
            _chat_id: ChatId,
            cursor: Option<Cursor>,
            limit: u32,
        ) -> Result<Vec<Message>, ClientError> {
            self.calls.lock().push(cursor);
            if self.fail {
                return Err(ChatError::NetworkPartition("offline".into()).into());
            }
            Ok(self
                .log
                .iter()
                .filter(|m| cursor.map_or(true, |c| c.precedes(&m.cursor())))
                .take(limit.min(self.cap) as usize)
                .cloned()
                .collect())
        }

        async fn fetch_chat(&self, _chat_id: ChatId) -> Result<Option<ChatSummary>, ClientError> {
            Ok(self.summary.clone())
        }
    }

    fn log(chat: ChatId, n: usize) -> Vec<Message> {
        let base = Utc::now();
        let sender = UserId::new();
        (0..n)
            .map(|i| Message {
                id: MessageId::new(),
                chat_id: chat,
                sender_id: sender,
                payload: Payload::text(format!("m{i}")),
                status: MessageStatus::Sent,
                created_at: base + ChronoDuration::milliseconds(i as i64),
            })
            .collect()
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let chat = ChatId::new();
        let history = Arc::new(FakeHistory::serving(log(chat, 5)));
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;

        let sweeper = ResyncSweeper::new(cache.clone(), history.clone(), Duration::from_secs(30), 2);
        assert_eq!(sweeper.sync_chat(chat).await.unwrap(), 5);
        assert_eq!(history.calls.lock().len(), 3);
        assert_eq!(cache.get_messages(chat).len(), 5);

        // Second pass starts at the last cursor and merges nothing.
        assert_eq!(sweeper.sync_chat(chat).await.unwrap(), 0);
        assert_eq!(cache.get_messages(chat).len(), 5);
    }

    #[tokio::test]
    async fn server_side_page_cap_does_not_end_sync_early() {
        let chat = ChatId::new();
        let mut history = FakeHistory::serving(log(chat, 25));
        history.cap = 10;
        let history = Arc::new(history);
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;

        let sweeper = ResyncSweeper::new(cache.clone(), history.clone(), Duration::from_secs(30), 50);
        assert_eq!(sweeper.sync_chat(chat).await.unwrap(), 25);
        assert_eq!(cache.get_messages(chat).len(), 25);
        // 10, 10, then a final 5.
        assert_eq!(history.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn short_first_page_is_confirmed_by_an_empty_one() {
        let chat = ChatId::new();
        let history = Arc::new(FakeHistory::serving(log(chat, 3)));
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;

        let sweeper = ResyncSweeper::new(cache.clone(), history.clone(), Duration::from_secs(30), 50);
        assert_eq!(sweeper.sync_chat(chat).await.unwrap(), 3);
        assert_eq!(history.calls.lock().len(), 2);
        assert!(cache.age(chat).is_some());
    }

    #[tokio::test]
    async fn sync_fetches_missing_chat_details() {
        let chat = ChatId::new();
        let mut history = FakeHistory::serving(Vec::new());
        history.summary = Some(ChatSummary {
            id: chat,
            kind: ChatKind::Group,
            name: Some("Weekend".into()),
            avatar: None,
            participants: vec![UserId::new()],
        });
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;

        let sweeper = ResyncSweeper::new(cache.clone(), Arc::new(history), Duration::from_secs(30), 50);
        sweeper.sync_chat(chat).await.unwrap();
        assert_eq!(cache.meta(chat).unwrap().name.as_deref(), Some("Weekend"));
    }

    #[tokio::test]
    async fn sweep_skips_fresh_chats_unless_forced() {
        let chat = ChatId::new();
        let history = Arc::new(FakeHistory::serving(log(chat, 1)));
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;
        let sweeper = ResyncSweeper::new(cache.clone(), history.clone(), Duration::from_secs(300), 50);

        assert_eq!(sweeper.sweep_now(false).await.chats_synced, 1, "never synced is stale");
        assert_eq!(sweeper.sweep_now(false).await.chats_synced, 0);
        assert_eq!(sweeper.sweep_now(true).await.chats_synced, 1);
    }

    #[tokio::test]
    async fn failures_leave_chat_stale() {
        let chat = ChatId::new();
        let mut history = FakeHistory::serving(Vec::new());
        history.fail = true;
        let history = Arc::new(history);
        let cache = Arc::new(ClientCache::new(4));
        cache.open_chat(chat).await;
        let sweeper = ResyncSweeper::new(cache.clone(), history, Duration::from_secs(300), 50);

        let report = sweeper.sweep_now(false).await;
        assert_eq!(report.failures, 1);
        assert!(cache.age(chat).is_none());
    }
}
