//! Client facade tying the cache, the pending-send tracker, the sweeper and
//! the real-time connection together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chatwave_shared::constants::DEFAULT_SESSION_QUEUE;
use chatwave_shared::error::ErrorCode;
use chatwave_shared::models::{Message, Payload};
use chatwave_shared::protocol::{ClientEvent, MessageEnvelope, SendAck, SendRequest, ServerEvent};
use chatwave_shared::status::{DeliveryState, FailureReason, MessageStatus};
use chatwave_shared::types::{ChatId, MessageId, TempId, UserId};

use crate::cache::ClientCache;
use crate::config::ClientConfig;
use crate::entry::{CachedMessage, ChatMeta, PresenceInfo};
use crate::error::{ClientError, Result};
use crate::events::{emit, ClientNotification, NOTIFICATION_BUFFER};
use crate::history::HistorySource;
use crate::outbox::{PendingSend, PendingSends};
use crate::sweeper::ResyncSweeper;

struct Inner {
    config: ClientConfig,
    user_id: UserId,
    cache: Arc<ClientCache>,
    sweeper: ResyncSweeper,
    pending: PendingSends,
    outbound: mpsc::Sender<ClientEvent>,
    notifications: broadcast::Sender<ClientNotification>,
    presence: Mutex<HashMap<UserId, PresenceInfo>>,
    connected: AtomicBool,
}

/// Handle to a signed-in chat client. Cheap to clone.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    /// Build a client. The returned receiver carries outbound frames and is
    /// handed to [`crate::connection::run`].
    pub fn new(
        config: ClientConfig,
        user_id: UserId,
        cache: Arc<ClientCache>,
        history: Arc<dyn HistorySource>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outbound, outbound_rx) = mpsc::channel(DEFAULT_SESSION_QUEUE);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let sweeper = ResyncSweeper::new(
            cache.clone(),
            history,
            config.stale_after,
            config.page_size,
        );

        let client = Self {
            inner: Arc::new(Inner {
                config,
                user_id,
                cache,
                sweeper,
                pending: PendingSends::new(),
                outbound,
                notifications,
                presence: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
            }),
        };
        (client, outbound_rx)
    }

    pub fn user_id(&self) -> UserId {
        self.inner.user_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.inner.cache
    }

    pub fn sweeper(&self) -> &ResyncSweeper {
        &self.inner.sweeper
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
        self.inner.notifications.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn presence(&self, user_id: &UserId) -> Option<PresenceInfo> {
        self.inner.presence.lock().get(user_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Cached messages of a chat, straight from memory.
    pub fn messages(&self, chat_id: ChatId) -> Vec<CachedMessage> {
        self.viewed(self.inner.cache.get_messages(chat_id))
    }

    /// Cached name, avatar and member presence of a chat.
    pub fn chat_meta(&self, chat_id: ChatId) -> Option<ChatMeta> {
        self.inner.cache.meta(chat_id)
    }

    fn viewed(&self, mut messages: Vec<CachedMessage>) -> Vec<CachedMessage> {
        for message in &mut messages {
            message.is_user = message.sender_id == self.inner.user_id;
        }
        messages
    }

    fn notify(&self, notification: ClientNotification) {
        emit(&self.inner.notifications, notification);
    }

    fn push(&self, frame: ClientEvent) -> Result<()> {
        self.inner.outbound.try_send(frame).map_err(|e| {
            warn!(error = %e, "Outbound frame dropped");
            ClientError::NotConnected
        })
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Show the message immediately and queue it for the server.
    ///
    /// The returned temp id identifies the optimistic entry until it is
    /// confirmed. If the frame cannot be queued the entry is marked failed
    /// and can be resent.
    pub fn send(&self, chat_id: ChatId, payload: Payload) -> Result<TempId> {
        let payload = payload.normalized();
        payload.validate()?;

        let temp_id = TempId::generate();
        self.inner
            .cache
            .add_optimistic(chat_id, self.inner.user_id, payload.clone(), temp_id.clone());
        self.submit(chat_id, payload, temp_id.clone());
        Ok(temp_id)
    }

    fn submit(&self, chat_id: ChatId, payload: Payload, temp_id: TempId) {
        self.inner
            .pending
            .track(temp_id.clone(), chat_id, self.inner.user_id, payload.clone());
        self.notify(ClientNotification::MessagesChanged { chat_id });

        let frame = ClientEvent::SendMessage(SendRequest {
            chat_id,
            payload,
            client_temp_id: temp_id.clone(),
        });
        if self.push(frame).is_err() {
            let pending = self.inner.pending.complete(&temp_id);
            self.fail_send(&temp_id, FailureReason::Unavailable, pending);
        }
    }

    /// Surface a failed send. The optimistic entry is flagged; if it is no
    /// longer cached it is rebuilt from the pending record.
    fn fail_send(&self, temp_id: &TempId, reason: FailureReason, pending: Option<PendingSend>) {
        let chat_id = match (self.inner.cache.locate_temp(temp_id), pending) {
            (Some((chat_id, _)), _) => {
                if !self.inner.cache.mark_failed(chat_id, temp_id, reason) {
                    return;
                }
                chat_id
            }
            // A timed-out send that a confirmation already claimed is done.
            (None, Some(p))
                if reason == FailureReason::TimedOut
                    && self.inner.cache.carries_temp(p.chat_id, temp_id) =>
            {
                debug!(temp = %temp_id, "Timed-out send was already confirmed");
                return;
            }
            // Evicted, or removed by reconciliation.
            (None, Some(p)) => {
                let chat_id = p.chat_id;
                let mut restored =
                    CachedMessage::optimistic(chat_id, p.sender_id, p.payload, temp_id.clone());
                restored.state = DeliveryState::Failed(reason);
                self.inner.cache.restore(restored);
                info!(temp = %temp_id, chat = %chat_id, "Re-inserted failed message");
                chat_id
            }
            (None, None) => {
                debug!(temp = %temp_id, "Failure for unknown send");
                return;
            }
        };

        self.notify(ClientNotification::MessageFailed {
            chat_id,
            temp_id: temp_id.clone(),
            reason,
        });
    }

    /// Send a failed message again under a fresh temp id.
    pub fn resend(&self, temp_id: &TempId) -> Result<TempId> {
        let (chat_id, entry) = self
            .inner
            .cache
            .locate_temp(temp_id)
            .ok_or_else(|| ClientError::UnknownMessage(temp_id.to_string()))?;

        match entry.state {
            DeliveryState::Failed(reason) if reason.can_resend() => {}
            _ => return Err(ClientError::NotResendable(temp_id.to_string())),
        }

        let fresh = TempId::generate();
        let reissued = self
            .inner
            .cache
            .reissue(chat_id, temp_id, fresh.clone())
            .ok_or_else(|| ClientError::NotResendable(temp_id.to_string()))?;

        info!(old = %temp_id, new = %fresh, chat = %chat_id, "Resending message");
        self.submit(chat_id, reissued.payload, fresh.clone());
        Ok(fresh)
    }

    /// Mark every overdue send as failed. No automatic retry.
    pub fn expire_pending(&self) -> Vec<TempId> {
        let expired = self.inner.pending.expire(self.inner.config.send_timeout);
        let mut temp_ids = Vec::with_capacity(expired.len());
        for (temp_id, pending) in expired {
            warn!(temp = %temp_id, chat = %pending.chat_id, "Send timed out");
            self.fail_send(&temp_id, FailureReason::TimedOut, Some(pending));
            temp_ids.push(temp_id);
        }
        temp_ids
    }

    /// Periodically run [`expire_pending`](Self::expire_pending).
    pub fn spawn_expiry(&self) -> JoinHandle<()> {
        let client = self.clone();
        let period = (self.inner.config.send_timeout / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                client.expire_pending();
            }
        })
    }

    /// Open a chat for display: cached messages are returned at once and a
    /// background resync runs if the cache is stale.
    pub async fn open_chat(&self, chat_id: ChatId) -> Vec<CachedMessage> {
        let messages = self.viewed(self.inner.cache.open_chat(chat_id).await);
        if let Err(e) = self.push(ClientEvent::JoinChat { chat_id }) {
            debug!(chat = %chat_id, error = %e, "Join deferred until reconnect");
        }

        let stale = self
            .inner
            .cache
            .age(chat_id)
            .map_or(true, |age| age >= self.inner.config.stale_after);
        if stale {
            let client = self.clone();
            tokio::spawn(async move {
                match client.inner.sweeper.sync_chat(chat_id).await {
                    Ok(merged) if merged > 0 => {
                        client.notify(ClientNotification::MessagesChanged { chat_id })
                    }
                    Ok(_) => {}
                    Err(e) => warn!(chat = %chat_id, error = %e, "Initial sync failed"),
                }
            });
        }
        messages
    }

    pub fn close_chat(&self, chat_id: ChatId) {
        self.inner.cache.close_chat(chat_id);
    }

    /// Tell the server the user has seen everything in the chat.
    pub fn mark_read(&self, chat_id: ChatId) -> Result<()> {
        self.push(ClientEvent::MarkChatRead { chat_id })
    }

    /// Report a status for a single message from someone else.
    pub fn report_status(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Result<()> {
        self.push(ClientEvent::MessageStatusUpdate {
            message_id,
            status,
            chat_id,
        })
    }

    pub fn typing(&self, chat_id: ChatId, active: bool) -> Result<()> {
        let frame = if active {
            ClientEvent::TypingStart { chat_id }
        } else {
            ClientEvent::TypingStop { chat_id }
        };
        self.push(frame)
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Called by the connection loop after every successful (re)connect.
    pub fn on_connected(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        self.notify(ClientNotification::ConnectionChanged { connected: true });

        for chat_id in self.inner.cache.open_chats() {
            let _ = self.push(ClientEvent::JoinChat { chat_id });
        }

        let client = self.clone();
        tokio::spawn(async move {
            let report = client.inner.sweeper.sweep_now(true).await;
            if report.messages_merged > 0 {
                for chat_id in client.inner.cache.open_chats() {
                    client.notify(ClientNotification::MessagesChanged { chat_id });
                }
            }
        });
    }

    pub fn on_disconnected(&self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.notify(ClientNotification::ConnectionChanged { connected: false });
        }
    }

    // -----------------------------------------------------------------------
    // Server events
    // -----------------------------------------------------------------------

    pub fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Ready {
                session_id, chats, ..
            } => {
                info!(session = %session_id, chats = chats.len(), "Session ready");
            }
            ServerEvent::SendAck(ack) => self.handle_ack(ack),
            ServerEvent::NewMessage(envelope) => self.handle_new_message(envelope),
            ServerEvent::MessageStatusUpdated {
                message_id,
                chat_id,
                status,
            } => {
                if self.inner.cache.apply_status(chat_id, message_id, status) {
                    self.notify(ClientNotification::MessagesChanged { chat_id });
                }
            }
            ServerEvent::UserTyping { chat_id, user_id } => {
                self.notify(ClientNotification::Typing {
                    chat_id,
                    user_id,
                    active: true,
                });
            }
            ServerEvent::UserStoppedTyping { chat_id, user_id } => {
                self.notify(ClientNotification::Typing {
                    chat_id,
                    user_id,
                    active: false,
                });
            }
            ServerEvent::UserOnline { user_id } => self.set_presence(user_id, true, None),
            ServerEvent::UserOffline { user_id, last_seen } => {
                self.set_presence(user_id, false, Some(last_seen))
            }
            ServerEvent::Error { code, message } => {
                warn!(?code, %message, "Server reported an error");
                self.notify(ClientNotification::Error { code, message });
            }
        }
    }

    fn set_presence(&self, user_id: UserId, online: bool, last_seen: Option<DateTime<Utc>>) {
        let info = {
            let mut presence = self.inner.presence.lock();
            let entry = presence.entry(user_id).or_insert(PresenceInfo {
                online,
                last_seen: None,
            });
            entry.online = online;
            if last_seen.is_some() {
                entry.last_seen = last_seen;
            }
            *entry
        };
        self.inner.cache.update_presence(&user_id, info);
        self.notify(ClientNotification::PresenceChanged {
            user_id,
            online: info.online,
            last_seen: info.last_seen,
        });
    }

    fn handle_new_message(&self, envelope: MessageEnvelope) {
        let MessageEnvelope {
            message,
            client_temp_id,
        } = envelope;
        let temp_id = client_temp_id.filter(|_| message.sender_id == self.inner.user_id);
        if let Some(temp) = &temp_id {
            self.inner.pending.complete(temp);
        }
        self.merge(&message, temp_id.as_ref());
    }

    fn handle_ack(&self, ack: SendAck) {
        let temp_id = ack.client_temp_id.clone();
        let pending = self.inner.pending.complete(&temp_id);

        if ack.success {
            let confirmed = ack.message.clone().or_else(|| {
                let pending = pending.as_ref()?;
                Some(Message {
                    id: ack.message_id?,
                    chat_id: pending.chat_id,
                    sender_id: pending.sender_id,
                    payload: pending.payload.clone(),
                    status: ack.status.unwrap_or(MessageStatus::Sent),
                    created_at: ack.timestamp?,
                })
            });
            match confirmed {
                Some(message) => {
                    debug!(temp = %temp_id, id = %message.id, "Send acknowledged");
                    self.merge(&message, Some(&temp_id));
                }
                None => warn!(temp = %temp_id, "Acknowledgment without confirmation data"),
            }
            return;
        }

        let code = ack.error_code().unwrap_or(ErrorCode::TransientStore);
        let reason = FailureReason::from_code(code);
        warn!(temp = %temp_id, ?code, "Send rejected");
        // The server never stored this one, even if reconciliation paired
        // it with another send.
        self.fail_send(&temp_id, reason, pending);
    }

    fn merge(&self, message: &Message, temp_id: Option<&TempId>) {
        let outcome = self.inner.cache.reconcile(message.chat_id, temp_id, message);
        if outcome.changed() {
            self.notify(ClientNotification::MessagesChanged {
                chat_id: message.chat_id,
            });
        }
    }
}
