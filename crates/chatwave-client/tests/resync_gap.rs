//! A client that missed messages while disconnected catches up through the
//! sweeper, against the real server-side store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chatwave_client::cache::ClientCache;
use chatwave_client::error::ClientError;
use chatwave_client::history::HistorySource;
use chatwave_client::sweeper::ResyncSweeper;
use chatwave_server::store::{MessageStore, SqliteMessageStore};
use chatwave_shared::models::{ChatSummary, Cursor, Message, Payload};
use chatwave_shared::status::DeliveryState;
use chatwave_shared::types::{ChatId, TempId, UserId};

/// History served straight from the server's store.
struct StoreHistory(SqliteMessageStore);

#[async_trait]
impl HistorySource for StoreHistory {
    async fn fetch_since(
        &self,
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ClientError> {
        Ok(self.0.list_since(chat_id, cursor, limit).await?)
    }

    async fn fetch_chat(&self, chat_id: ChatId) -> Result<Option<ChatSummary>, ClientError> {
        Ok(Some(self.0.get_chat(chat_id).await?.summary()))
    }
}

struct Fixture {
    store: SqliteMessageStore,
    cache: Arc<ClientCache>,
    sweeper: ResyncSweeper,
    chat: ChatId,
    alice: UserId,
    bob: UserId,
}

fn fixture() -> Fixture {
    let store = SqliteMessageStore::open_in_memory().unwrap();
    let (alice, bob) = (UserId::new(), UserId::new());
    let chat = store
        .database()
        .lock()
        .get_or_create_direct_chat(alice, bob)
        .unwrap()
        .id;
    let cache = Arc::new(ClientCache::new(8));
    let sweeper = ResyncSweeper::new(
        cache.clone(),
        Arc::new(StoreHistory(store.clone())),
        Duration::from_secs(30),
        2,
    );
    Fixture {
        store,
        cache,
        sweeper,
        chat,
        alice,
        bob,
    }
}

async fn append(f: &Fixture, sender: UserId, text: &str) -> Message {
    f.store.append(f.chat, sender, Payload::text(text)).await.unwrap()
}

#[tokio::test]
async fn gap_is_filled_in_order_and_idempotently() {
    let f = fixture();

    // Connected phase: alice's cache saw the first three live.
    let mut seen = Vec::new();
    for i in 0..3 {
        seen.push(append(&f, f.bob, &format!("live {i}")).await);
    }
    f.cache.open_chat(f.chat).await;
    for message in &seen {
        f.cache.reconcile(f.chat, None, message);
    }
    f.cache.touch_synced(f.chat);

    // Disconnected: five more arrive at the server.
    let mut missed = Vec::new();
    for i in 0..5 {
        missed.push(append(&f, f.bob, &format!("missed {i}")).await);
    }

    // Reconnect forces a sweep regardless of age.
    let report = f.sweeper.sweep_now(true).await;
    assert_eq!(report.chats_synced, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(report.messages_merged, 5);

    let ids: Vec<_> = f
        .cache
        .get_messages(f.chat)
        .iter()
        .map(|m| m.server_id)
        .collect();
    let expected: Vec<_> = seen.iter().chain(&missed).map(|m| Some(m.id)).collect();
    assert_eq!(ids, expected);

    // Replaying the sweep and a late live broadcast changes nothing.
    assert_eq!(f.sweeper.sweep_now(true).await.messages_merged, 0);
    assert!(!f.cache.reconcile(f.chat, None, &missed[2]).changed());
    assert_eq!(f.cache.get_messages(f.chat).len(), 8);
}

#[tokio::test]
async fn resync_confirms_send_whose_ack_was_lost() {
    let f = fixture();
    f.cache.open_chat(f.chat).await;

    let temp = TempId::generate();
    f.cache
        .add_optimistic(f.chat, f.alice, Payload::text("did it arrive?"), temp.clone());
    // The server stored it but the connection dropped before the ack.
    let stored = append(&f, f.alice, "did it arrive?").await;

    f.sweeper.sweep_now(true).await;

    let messages = f.cache.get_messages(f.chat);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].server_id, Some(stored.id));
    assert_eq!(messages[0].temp_id, Some(temp));
    assert!(matches!(messages[0].state, DeliveryState::Confirmed(_)));
}

#[tokio::test]
async fn only_open_stale_chats_are_swept() {
    let f = fixture();
    append(&f, f.bob, "hello").await;

    // Not open: nothing to do.
    assert_eq!(f.sweeper.sweep_now(true).await.chats_synced, 0);

    f.cache.open_chat(f.chat).await;
    assert_eq!(f.sweeper.sweep_now(false).await.chats_synced, 1);
    // Fresh now.
    assert_eq!(f.sweeper.sweep_now(false).await.chats_synced, 0);
    assert_eq!(f.cache.get_messages(f.chat).len(), 1);
}

#[tokio::test]
async fn first_sync_caches_chat_members() {
    let f = fixture();
    f.cache.open_chat(f.chat).await;
    f.sweeper.sync_chat(f.chat).await.unwrap();

    let meta = f.cache.meta(f.chat).unwrap();
    let members: Vec<UserId> = meta.members.iter().map(|m| m.user_id).collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&f.alice) && members.contains(&f.bob));
    assert_eq!(meta.title(&f.alice), f.bob.to_string());
}
