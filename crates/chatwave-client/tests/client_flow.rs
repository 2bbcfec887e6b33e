//! Optimistic send, acknowledgment and failure handling driven through the
//! client facade with hand-built server events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use chatwave_client::cache::ClientCache;
use chatwave_client::client::ChatClient;
use chatwave_client::config::ClientConfig;
use chatwave_client::error::ClientError;
use chatwave_client::history::HistorySource;
use chatwave_client::reconcile::MergeOutcome;
use chatwave_shared::error::ChatError;
use chatwave_shared::models::{Cursor, Message, Payload};
use chatwave_shared::protocol::{ClientEvent, MessageEnvelope, SendAck, ServerEvent};
use chatwave_shared::status::{DeliveryState, FailureReason, MessageStatus};
use chatwave_shared::types::{ChatId, MessageId, TempId, UserId};

struct NoHistory;

#[async_trait]
impl HistorySource for NoHistory {
    async fn fetch_since(
        &self,
        _chat_id: ChatId,
        _cursor: Option<Cursor>,
        _limit: u32,
    ) -> Result<Vec<Message>, ClientError> {
        Ok(Vec::new())
    }
}

fn setup(config: ClientConfig) -> (ChatClient, mpsc::Receiver<ClientEvent>, ChatId) {
    let (client, outbound) = ChatClient::new(
        config,
        UserId::new(),
        Arc::new(ClientCache::new(16)),
        Arc::new(NoHistory),
    );
    (client, outbound, ChatId::new())
}

/// What the server would store for a send frame.
fn stored(frame: ClientEvent, sender: UserId) -> (Message, TempId) {
    let ClientEvent::SendMessage(req) = frame else {
        panic!("expected send_message, got {frame:?}");
    };
    let message = Message {
        id: MessageId::new(),
        chat_id: req.chat_id,
        sender_id: sender,
        payload: req.payload,
        status: MessageStatus::Sent,
        created_at: Utc::now(),
    };
    (message, req.client_temp_id)
}

#[tokio::test]
async fn optimistic_message_is_confirmed_in_place() {
    let (client, mut outbound, chat) = setup(ClientConfig::default());

    let temp = client.send(chat, Payload::text("Hello")).unwrap();
    let (message, echoed) = stored(outbound.recv().await.unwrap(), client.user_id());
    assert_eq!(echoed, temp);

    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&message, temp.clone())));
    client.handle_server_event(ServerEvent::NewMessage(MessageEnvelope {
        message: message.clone(),
        client_temp_id: Some(temp.clone()),
    }));
    client.handle_server_event(ServerEvent::MessageStatusUpdated {
        message_id: message.id,
        chat_id: chat,
        status: MessageStatus::Delivered,
    });
    // Stale status from a slower path.
    client.handle_server_event(ServerEvent::MessageStatusUpdated {
        message_id: message.id,
        chat_id: chat,
        status: MessageStatus::Sent,
    });

    let messages = client.messages(chat);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].server_id, Some(message.id));
    assert_eq!(messages[0].temp_id, Some(temp));
    assert_eq!(
        messages[0].state,
        DeliveryState::Confirmed(MessageStatus::Delivered)
    );
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn failure_ack_reinserts_message_removed_as_ghost() {
    let (client, mut outbound, chat) = setup(ClientConfig::default());
    let me = client.user_id();

    let first = client.send(chat, Payload::text("ok")).unwrap();
    let second = client.send(chat, Payload::text("ok")).unwrap();
    let (first_stored, _) = stored(outbound.recv().await.unwrap(), me);
    let _second_frame = outbound.recv().await.unwrap();

    // A resync page brings the first send back without its temp id.
    let outcome = client.cache().reconcile(chat, None, &first_stored);
    assert_eq!(
        outcome,
        MergeOutcome::ReplacedByContent {
            ghosts_removed: vec![second.clone()]
        }
    );
    assert_eq!(client.messages(chat).len(), 1);

    // The server never stored the second one.
    client.handle_server_event(ServerEvent::SendAck(SendAck::rejected(
        second.clone(),
        &ChatError::TransientStore("disk full".into()),
    )));

    let messages = client.messages(chat);
    assert_eq!(messages.len(), 2);
    let restored = messages
        .iter()
        .find(|m| m.temp_id.as_ref() == Some(&second))
        .unwrap();
    assert_eq!(restored.state, DeliveryState::Failed(FailureReason::Unavailable));

    // The first ack is now a no-op.
    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&first_stored, first)));
    assert_eq!(client.messages(chat).len(), 2);

    let fresh = client.resend(&second).unwrap();
    assert!(matches!(
        outbound.recv().await.unwrap(),
        ClientEvent::SendMessage(req) if req.client_temp_id == fresh
    ));
}

#[tokio::test]
async fn timed_out_send_is_failed_then_resent_explicitly() {
    let (client, mut outbound, chat) = setup(ClientConfig {
        send_timeout: Duration::ZERO,
        ..ClientConfig::default()
    });
    let me = client.user_id();

    let temp = client.send(chat, Payload::text("anyone there?")).unwrap();
    let (late_copy, _) = stored(outbound.recv().await.unwrap(), me);

    assert_eq!(client.expire_pending(), vec![temp.clone()]);
    assert_eq!(
        client.messages(chat)[0].state,
        DeliveryState::Failed(FailureReason::TimedOut)
    );
    // Nothing is retried on its own.
    assert!(outbound.try_recv().is_err());

    let fresh = client.resend(&temp).unwrap();
    assert_ne!(fresh, temp);
    let (resent_copy, echoed) = stored(outbound.recv().await.unwrap(), me);
    assert_eq!(echoed, fresh);
    assert_eq!(client.messages(chat)[0].state, DeliveryState::Sending);

    // The first attempt was stored after all; both server copies survive.
    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&late_copy, temp)));
    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&resent_copy, fresh)));

    let ids: HashSet<_> = client
        .messages(chat)
        .iter()
        .map(|m| m.server_id)
        .collect();
    assert_eq!(ids, HashSet::from([Some(late_copy.id), Some(resent_copy.id)]));
}

/// Two identical sends whose confirmations arrive without temp ids and out
/// of order get paired with the wrong optimistic entries. The list still
/// converges to exactly the two stored messages.
#[tokio::test]
async fn identical_sends_converge_despite_wrong_pairing() {
    let (client, mut outbound, chat) = setup(ClientConfig::default());
    let me = client.user_id();

    let first = client.send(chat, Payload::text("same")).unwrap();
    let second = client.send(chat, Payload::text("same")).unwrap();
    let (m1, _) = stored(outbound.recv().await.unwrap(), me);
    let (m2, _) = stored(outbound.recv().await.unwrap(), me);

    // The second message arrives first with no temp id and takes over the
    // first optimistic entry; the other one is dropped as a ghost.
    client.handle_server_event(ServerEvent::NewMessage(MessageEnvelope {
        message: m2.clone(),
        client_temp_id: None,
    }));
    assert_eq!(client.messages(chat).len(), 1);

    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&m1, first)));
    client.handle_server_event(ServerEvent::SendAck(SendAck::accepted(&m2, second)));

    let messages = client.messages(chat);
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.is_confirmed()));
    let ids: HashSet<_> = messages.iter().map(|m| m.server_id).collect();
    assert_eq!(ids, HashSet::from([Some(m1.id), Some(m2.id)]));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn rejected_message_cannot_be_resent() {
    let (client, _outbound, chat) = setup(ClientConfig::default());
    let temp = client.send(chat, Payload::text("hi")).unwrap();

    client.handle_server_event(ServerEvent::SendAck(SendAck::rejected(
        temp.clone(),
        &ChatError::Validation("too long".into()),
    )));

    assert!(matches!(
        client.resend(&temp),
        Err(ClientError::NotResendable(_))
    ));
    assert!(matches!(
        client.resend(&TempId::from("temp-unknown")),
        Err(ClientError::UnknownMessage(_))
    ));
}
