//! Push-notification hand-off.
//!
//! After a message is stored the gateway builds a [`DeliveryNotice`] and
//! passes it to a [`NotificationDispatcher`] on a spawned task, so a slow
//! push provider never delays the sender's acknowledgment.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use chatwave_shared::types::{ChatId, MessageId, UserId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NoticeRecipient {
    pub user_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryNotice {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub recipients: Vec<NoticeRecipient>,
    pub summary: String,
}

impl DeliveryNotice {
    pub fn offline_recipients(&self) -> impl Iterator<Item = &UserId> {
        self.recipients
            .iter()
            .filter(|r| !r.online)
            .map(|r| &r.user_id)
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notice: DeliveryNotice);
}

/// Dispatcher that records what would be pushed.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notice: DeliveryNotice) {
        for user in notice.offline_recipients() {
            info!(
                user = %user,
                chat = %notice.chat_id,
                message = %notice.message_id,
                summary = %notice.summary,
                "Push notification queued"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_filter() {
        let (on, off) = (UserId::new(), UserId::new());
        let notice = DeliveryNotice {
            message_id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            recipients: vec![
                NoticeRecipient { user_id: on, online: true },
                NoticeRecipient { user_id: off, online: false },
            ],
            summary: "hi".into(),
        };
        let offline: Vec<_> = notice.offline_recipients().copied().collect();
        assert_eq!(offline, vec![off]);
    }
}
