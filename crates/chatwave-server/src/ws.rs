//! WebSocket connection loop.
//!
//! One task per connection. Inbound frames are decoded and handed to the
//! gateway strictly one after another; outbound events arrive on the
//! session's bounded queue and are written in the order they were queued.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatwave_shared::error::ChatError;
use chatwave_shared::protocol::{ClientEvent, ServerEvent};
use chatwave_shared::types::UserId;

use crate::gateway::{Gateway, Session};

pub async fn handle_connection(socket: WebSocket, gateway: Gateway, user_id: UserId) {
    let (mut sender, receiver) = socket.split();

    let (session, outbound) = match gateway.connect(user_id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(user = %user_id, error = %err, "Could not open session");
            let _ = send_event(&mut sender, &ServerEvent::error(&err)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    run_session(&mut sender, receiver, outbound, &session, &gateway).await;

    gateway.disconnect(&session).await;
    let _ = sender.close().await;
}

async fn run_session<S, R>(
    sender: &mut S,
    mut receiver: R,
    mut outbound: mpsc::Receiver<ServerEvent>,
    session: &Session,
    gateway: &Gateway,
) where
    S: SinkExt<Message> + Unpin,
    R: StreamExt<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_frame(text.as_str(), session, gateway).await;
                        // Flush whatever the handler queued (e.g. our own
                        // new_message) before the direct reply.
                        while let Ok(event) = outbound.try_recv() {
                            if send_event(sender, &event).await.is_err() {
                                return;
                            }
                        }
                        if let Some(reply) = reply {
                            if send_event(sender, &reply).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(session = %session.id, "Client closed connection");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session.id, error = %e, "WebSocket read error");
                        return;
                    }
                }
            }
            event = outbound.recv() => {
                match event {
                    Some(event) => {
                        if send_event(sender, &event).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

/// Decode and dispatch one inbound frame. Errors become an `error` event
/// addressed to the caller.
async fn handle_frame(text: &str, session: &Session, gateway: &Gateway) -> Option<ServerEvent> {
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(session = %session.id, error = %e, "Malformed frame");
            return Some(ServerEvent::error(&ChatError::Validation(format!(
                "malformed event: {e}"
            ))));
        }
    };

    match gateway.dispatch(session, event).await {
        Ok(reply) => reply,
        Err(err) => {
            info!(session = %session.id, error = %err, "Event rejected");
            Some(ServerEvent::error(&err))
        }
    }
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = match event.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to encode server event");
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}
