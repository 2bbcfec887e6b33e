//! Async seam over the message store.
//!
//! The gateway talks to [`MessageStore`]; [`SqliteMessageStore`] runs every
//! call against `chatwave-store` on the blocking pool. A single connection
//! behind a mutex serializes appends, which is what keeps per-chat ordering
//! positions unique.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use chatwave_shared::error::ChatError;
use chatwave_shared::models::{Chat, Cursor, Message, Payload};
use chatwave_shared::status::MessageStatus;
use chatwave_shared::types::{ChatId, MessageId, UserId};
use chatwave_store::{Database, StatusUpdate, StoreError};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        payload: Payload,
    ) -> Result<Message, ChatError>;

    async fn list_since(
        &self,
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError>;

    async fn update_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusUpdate, ChatError>;

    async fn get_message(&self, message_id: MessageId) -> Result<Message, ChatError>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat, ChatError>;

    async fn chats_for_user(&self, user_id: UserId) -> Result<Vec<ChatId>, ChatError>;

    async fn is_participant(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ChatError>;

    /// Advance every message of `chat_id` not sent by `reader` to `read`.
    async fn mark_read_up_to(
        &self,
        chat_id: ChatId,
        reader: UserId,
    ) -> Result<Vec<Message>, ChatError>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Direct access for bootstrap and tests (chat creation lives outside
    /// the delivery core).
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut guard = db.lock();
            f(&mut guard)
        })
        .await;

        match joined {
            Ok(result) => result.map_err(|e| map_store_error(op, e)),
            Err(e) => {
                warn!(op, error = %e, "Store task failed");
                Err(ChatError::TransientStore(format!("{op}: task failed")))
            }
        }
    }
}

fn map_store_error(op: &'static str, err: StoreError) -> ChatError {
    match err {
        StoreError::NotFound => ChatError::NotFound(format!("{op}: not found")),
        StoreError::Invalid(msg) => ChatError::Validation(msg),
        other => {
            warn!(op, error = %other, "Store operation failed");
            ChatError::TransientStore(other.to_string())
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        payload: Payload,
    ) -> Result<Message, ChatError> {
        self.run("append", move |db| {
            db.append_message(chat_id, sender_id, &payload)
        })
        .await
    }

    async fn list_since(
        &self,
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ChatError> {
        self.run("list_since", move |db| {
            db.list_messages_since(chat_id, cursor.as_ref(), limit)
        })
        .await
    }

    async fn update_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusUpdate, ChatError> {
        self.run("update_status", move |db| {
            db.update_message_status(message_id, status)
        })
        .await
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Message, ChatError> {
        self.run("get_message", move |db| db.get_message(message_id))
            .await
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat, ChatError> {
        self.run("get_chat", move |db| db.get_chat(chat_id)).await
    }

    async fn chats_for_user(&self, user_id: UserId) -> Result<Vec<ChatId>, ChatError> {
        self.run("chats_for_user", move |db| db.chat_ids_for_user(user_id))
            .await
    }

    async fn is_participant(&self, chat_id: ChatId, user_id: UserId) -> Result<bool, ChatError> {
        self.run("is_participant", move |db| {
            db.is_participant(chat_id, user_id)
        })
        .await
    }

    async fn mark_read_up_to(
        &self,
        chat_id: ChatId,
        reader: UserId,
    ) -> Result<Vec<Message>, ChatError> {
        self.run("mark_read_up_to", move |db| {
            db.mark_read_up_to_now(chat_id, reader)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_map_to_chat_taxonomy() {
        let store = SqliteMessageStore::open_in_memory().unwrap();
        let user = UserId::new();

        assert!(matches!(
            store.append(ChatId::new(), user, Payload::text("hi")).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            store.get_message(MessageId::new()).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn append_and_list_through_blocking_pool() {
        let store = SqliteMessageStore::open_in_memory().unwrap();
        let (a, b) = (UserId::new(), UserId::new());
        let chat = store
            .database()
            .lock()
            .get_or_create_direct_chat(a, b)
            .unwrap();

        let first = store.append(chat.id, a, Payload::text("1")).await.unwrap();
        let second = store.append(chat.id, b, Payload::text("2")).await.unwrap();

        let all = store.list_since(chat.id, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        let after = store
            .list_since(chat.id, Some(first.cursor()), 10)
            .await
            .unwrap();
        assert_eq!(after, vec![second]);

        assert!(store.is_participant(chat.id, a).await.unwrap());
        assert_eq!(store.chats_for_user(b).await.unwrap(), vec![chat.id]);
    }
}
