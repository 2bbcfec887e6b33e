//! The real-time gateway.
//!
//! Owns the session registry, the room index and the presence tracker, and
//! routes every client event through the message store. All handlers take
//! `&self`; the gateway is cheap to clone and shared by every connection.
//!
//! Each connection feeds its events through [`Gateway::dispatch`] one at a
//! time, which is what preserves a sender's submission order.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatwave_shared::error::ChatError;
use chatwave_shared::models::Message;
use chatwave_shared::protocol::{ClientEvent, MessageEnvelope, SendAck, SendRequest, ServerEvent};
use chatwave_shared::status::MessageStatus;
use chatwave_shared::types::{ChatId, MessageId, SessionId, UserId};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::notify::{DeliveryNotice, LogDispatcher, NoticeRecipient, NotificationDispatcher};
use crate::presence::PresenceTracker;
use crate::rate_limit::RateLimiter;
use crate::rooms::RoomIndex;
use crate::sessions::SessionRegistry;
use crate::store::MessageStore;

/// An authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
}

/// Result of pushing one event to a room.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the event.
    pub accepted: usize,
    /// Accepted sessions that belong to someone other than `origin`.
    pub accepted_by_others: usize,
}

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn Authenticator>,
    notifier: Arc<dyn NotificationDispatcher>,
    presence: PresenceTracker,
    rooms: RoomIndex,
    sessions: SessionRegistry,
    send_limiter: RateLimiter<UserId>,
    queue_capacity: usize,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn MessageStore>,
        auth: Arc<dyn Authenticator>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            store,
            auth,
            notifier: Arc::new(LogDispatcher),
            presence: PresenceTracker::new(),
            rooms: RoomIndex::new(),
            sessions: SessionRegistry::new(),
            send_limiter: RateLimiter::new(config.send_rate_per_sec, config.send_burst),
            queue_capacity: config.session_queue_capacity.max(1),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn send_limiter(&self) -> &RateLimiter<UserId> {
        &self.send_limiter
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    pub async fn authenticate(&self, credential: &str) -> Result<UserId, ChatError> {
        self.auth.verify(credential).await
    }

    /// Register a new session for an authenticated user.
    ///
    /// Subscribes it to every chat the user is in, queues `ready`, and
    /// announces the user if this is their first live session. The returned
    /// receiver is the session's outbound queue.
    pub async fn connect(
        &self,
        user_id: UserId,
    ) -> Result<(Session, mpsc::Receiver<ServerEvent>), ChatError> {
        let session = Session {
            id: SessionId::new(),
            user_id,
        };
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.sessions.register(session.id, user_id, tx).await;

        let chats = match self.join_rooms(&session).await {
            Ok(chats) => chats,
            Err(e) => {
                self.sessions.unregister(&session.id).await;
                self.rooms.leave_all(session.id).await;
                return Err(e);
            }
        };

        let first = self.presence.mark_online(user_id, session.id).await;
        self.sessions
            .send_to(
                &session.id,
                ServerEvent::Ready {
                    session_id: session.id,
                    user_id,
                    chats: chats.clone(),
                },
            )
            .await;

        if first {
            self.broadcast_to_chats(&chats, ServerEvent::UserOnline { user_id }, Some(user_id))
                .await;
        }

        info!(
            user = %user_id,
            session = %session.id,
            rooms = chats.len(),
            "Session connected"
        );
        Ok((session, rx))
    }

    /// Subscribe `session` to every chat its user participates in.
    pub async fn join_rooms(&self, session: &Session) -> Result<Vec<ChatId>, ChatError> {
        let chats = self.store.chats_for_user(session.user_id).await?;
        for chat_id in &chats {
            self.rooms.join(*chat_id, session.id).await;
        }
        Ok(chats)
    }

    /// Tear a session down. Announces `user_offline` (best effort) to the
    /// rooms the session was in when it was the user's last session.
    pub async fn disconnect(&self, session: &Session) {
        self.sessions.unregister(&session.id).await;
        let chats = self.rooms.leave_all(session.id).await;

        if let Some(last_seen) = self.presence.mark_offline(session.user_id, session.id).await {
            self.broadcast_to_chats(
                &chats,
                ServerEvent::UserOffline {
                    user_id: session.user_id,
                    last_seen,
                },
                Some(session.user_id),
            )
            .await;
        }

        info!(user = %session.user_id, session = %session.id, "Session disconnected");
    }

    // -----------------------------------------------------------------------
    // Client events
    // -----------------------------------------------------------------------

    /// Handle one client event. `Ok(Some(_))` is a reply addressed to the
    /// calling session only.
    pub async fn dispatch(
        &self,
        session: &Session,
        event: ClientEvent,
    ) -> Result<Option<ServerEvent>, ChatError> {
        match event {
            ClientEvent::JoinChat { chat_id } => {
                self.join_chat(session, chat_id).await?;
                Ok(None)
            }
            ClientEvent::LeaveChat { chat_id } => {
                self.leave_chat(session, chat_id).await;
                Ok(None)
            }
            ClientEvent::SendMessage(request) => {
                Ok(Some(ServerEvent::SendAck(self.handle_send(session, request).await)))
            }
            ClientEvent::MessageStatusUpdate {
                message_id,
                status,
                chat_id,
            } => {
                self.handle_status_change(session, message_id, status, Some(chat_id))
                    .await?;
                Ok(None)
            }
            ClientEvent::MarkChatRead { chat_id } => {
                self.mark_chat_read(session, chat_id).await?;
                Ok(None)
            }
            ClientEvent::TypingStart { chat_id } => {
                self.handle_typing(session, chat_id, true).await?;
                Ok(None)
            }
            ClientEvent::TypingStop { chat_id } => {
                self.handle_typing(session, chat_id, false).await?;
                Ok(None)
            }
        }
    }

    pub async fn join_chat(&self, session: &Session, chat_id: ChatId) -> Result<(), ChatError> {
        if !self.store.is_participant(chat_id, session.user_id).await? {
            return Err(ChatError::Forbidden("not a participant of this chat".into()));
        }
        self.rooms.join(chat_id, session.id).await;
        Ok(())
    }

    pub async fn leave_chat(&self, session: &Session, chat_id: ChatId) {
        self.rooms.leave(chat_id, session.id).await;
    }

    /// Persist and fan out a message. Never fails: every outcome becomes an
    /// acknowledgment carrying the client's temp id.
    pub async fn handle_send(&self, session: &Session, request: SendRequest) -> SendAck {
        let temp_id = request.client_temp_id.clone();
        match self.try_send(session, request).await {
            Ok(message) => SendAck::accepted(&message, temp_id),
            Err(err) => {
                warn!(
                    user = %session.user_id,
                    temp_id = %temp_id.as_str(),
                    error = %err,
                    "Send failed"
                );
                SendAck::rejected(temp_id, &err)
            }
        }
    }

    async fn try_send(&self, session: &Session, request: SendRequest) -> Result<Message, ChatError> {
        if !self.send_limiter.check(session.user_id).await {
            return Err(ChatError::RateLimited);
        }

        let SendRequest {
            chat_id,
            payload,
            client_temp_id,
        } = request;
        payload.validate()?;

        let chat = self.store.get_chat(chat_id).await?;
        if !chat.has_participant(&session.user_id) {
            return Err(ChatError::Forbidden("not a participant of this chat".into()));
        }

        let message = self
            .store
            .append(chat_id, session.user_id, payload.normalized())
            .await?;

        debug!(
            chat = %chat_id,
            message = %message.id,
            sender = %session.user_id,
            "Message stored"
        );

        let report = self
            .broadcast(
                chat_id,
                ServerEvent::NewMessage(MessageEnvelope {
                    message: message.clone(),
                    client_temp_id: Some(client_temp_id),
                }),
                None,
                Some(session.user_id),
            )
            .await;

        let mut recipients = Vec::new();
        for user_id in chat.recipients_of(&session.user_id) {
            let online = self.presence.is_online(&user_id).await;
            recipients.push(NoticeRecipient { user_id, online });
        }
        let anyone_online = recipients.iter().any(|r| r.online);

        if report.accepted_by_others > 0 || !anyone_online {
            self.advance_status(&message, MessageStatus::Delivered).await;
        }

        let notice = DeliveryNotice {
            message_id: message.id,
            chat_id,
            sender_id: session.user_id,
            recipients,
            summary: message.payload.summary(),
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            notifier.dispatch(notice).await;
        });

        Ok(message)
    }

    async fn advance_status(&self, message: &Message, status: MessageStatus) {
        match self.store.update_status(message.id, status).await {
            Ok(update) if update.advanced() => {
                self.broadcast(
                    message.chat_id,
                    ServerEvent::MessageStatusUpdated {
                        message_id: message.id,
                        chat_id: message.chat_id,
                        status,
                    },
                    None,
                    None,
                )
                .await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(message = %message.id, error = %e, "Status advance failed");
            }
        }
    }

    /// Apply a recipient's status change. Regressions are accepted silently
    /// and change nothing.
    pub async fn handle_status_change(
        &self,
        session: &Session,
        message_id: MessageId,
        status: MessageStatus,
        chat_hint: Option<ChatId>,
    ) -> Result<(), ChatError> {
        let message = self.store.get_message(message_id).await?;
        if chat_hint.is_some_and(|c| c != message.chat_id) {
            return Err(ChatError::Validation("message does not belong to chat".into()));
        }
        if message.sender_id == session.user_id {
            return Err(ChatError::Forbidden(
                "senders cannot change the status of their own message".into(),
            ));
        }
        if !self.store.is_participant(message.chat_id, session.user_id).await? {
            return Err(ChatError::Forbidden("not a participant of this chat".into()));
        }
        if !message.status.can_advance_to(status) {
            return Ok(());
        }

        let update = self.store.update_status(message_id, status).await?;
        if update.advanced() {
            self.broadcast(
                message.chat_id,
                ServerEvent::MessageStatusUpdated {
                    message_id,
                    chat_id: message.chat_id,
                    status: update.message().status,
                },
                None,
                None,
            )
            .await;
        }
        Ok(())
    }

    /// Mark everything other participants sent in `chat_id` as read.
    /// Returns how many messages advanced.
    pub async fn mark_chat_read(&self, session: &Session, chat_id: ChatId) -> Result<usize, ChatError> {
        if !self.store.is_participant(chat_id, session.user_id).await? {
            return Err(ChatError::Forbidden("not a participant of this chat".into()));
        }

        let advanced = self.store.mark_read_up_to(chat_id, session.user_id).await?;
        for message in &advanced {
            self.broadcast(
                chat_id,
                ServerEvent::MessageStatusUpdated {
                    message_id: message.id,
                    chat_id,
                    status: MessageStatus::Read,
                },
                None,
                None,
            )
            .await;
        }
        debug!(chat = %chat_id, reader = %session.user_id, count = advanced.len(), "Chat read");
        Ok(advanced.len())
    }

    /// Relay a typing indicator to the room. Never persisted; every session
    /// of the typing user is skipped.
    pub async fn handle_typing(
        &self,
        session: &Session,
        chat_id: ChatId,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        if !self.rooms.is_member(&chat_id, &session.id).await {
            return Err(ChatError::Forbidden("not subscribed to this chat".into()));
        }

        let event = if is_typing {
            ServerEvent::UserTyping {
                chat_id,
                user_id: session.user_id,
            }
        } else {
            ServerEvent::UserStoppedTyping {
                chat_id,
                user_id: session.user_id,
            }
        };
        self.broadcast(chat_id, event, Some(session.user_id), None)
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Queue `event` for every session in the room of `chat_id`, skipping
    /// sessions of `exclude`. Sessions of `origin` are delivered to but not
    /// counted in `accepted_by_others`.
    pub async fn broadcast(
        &self,
        chat_id: ChatId,
        event: ServerEvent,
        exclude: Option<UserId>,
        origin: Option<UserId>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for session_id in self.rooms.members(&chat_id).await {
            let Some(owner) = self.sessions.user_of(&session_id).await else {
                continue;
            };
            if exclude == Some(owner) {
                continue;
            }
            if self.sessions.send_to(&session_id, event.clone()).await {
                report.accepted += 1;
                if origin != Some(owner) {
                    report.accepted_by_others += 1;
                }
            }
        }
        report
    }

    /// Queue `event` once per session across several rooms.
    async fn broadcast_to_chats(&self, chats: &[ChatId], event: ServerEvent, exclude: Option<UserId>) {
        let mut seen = HashSet::new();
        for chat_id in chats {
            for session_id in self.rooms.members(chat_id).await {
                if !seen.insert(session_id) {
                    continue;
                }
                let Some(owner) = self.sessions.user_of(&session_id).await else {
                    continue;
                };
                if exclude == Some(owner) {
                    continue;
                }
                self.sessions.send_to(&session_id, event.clone()).await;
            }
        }
    }
}
