//! Real-time connection loop with reconnect.
//!
//! Frames pushed while disconnected wait in the outbound channel and go out
//! after the next successful connect. A frame that was taken from the
//! channel when the socket failed is not replayed; its send times out
//! instead.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chatwave_shared::error::ChatError;
use chatwave_shared::protocol::{ClientEvent, ServerEvent};

use crate::client::ChatClient;
use crate::error::{ClientError, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential reconnect delay with random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial: initial.max(Duration::from_millis(1)),
            max: max.max(initial),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        let capped = self.initial.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);

        let capped_ms = capped.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=capped_ms / 2 + 1);
        (capped + Duration::from_millis(jitter)).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Open an authenticated WebSocket to `url`.
pub async fn connect(url: &str, token: &str) -> Result<WsStream> {
    let mut request = url.into_client_request()?;
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ChatError::Authentication(format!("unusable token: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, value);

    match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _)) => Ok(stream),
        Err(tungstenite::Error::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
            Err(ChatError::Authentication("server refused the token".into()).into())
        }
        Err(e) => Err(e.into()),
    }
}

enum SessionEnd {
    OutboundClosed,
    Dropped(String),
}

/// Drive the connection until the client's outbound channel closes.
///
/// Returns an error only for failures that reconnecting cannot fix.
pub async fn run(client: ChatClient, mut outbound: mpsc::Receiver<ClientEvent>) -> Result<()> {
    let url = client.config().ws_url()?;
    let token = client.config().token.clone();
    let mut backoff = Backoff::new(client.config().reconnect_initial, client.config().reconnect_max);

    loop {
        match connect(&url, &token).await {
            Ok(stream) => {
                info!(%url, "Connected");
                backoff.reset();
                client.on_connected();
                let end = session(&client, stream, &mut outbound).await;
                client.on_disconnected();
                match end {
                    SessionEnd::OutboundClosed => {
                        info!("Client shut down, closing connection");
                        return Ok(());
                    }
                    SessionEnd::Dropped(reason) => warn!(%reason, "Connection lost"),
                }
            }
            Err(ClientError::Chat(err @ ChatError::Authentication(_))) => {
                warn!(error = %err, "Not reconnecting");
                return Err(err.into());
            }
            Err(e) => warn!(error = %e, attempt = backoff.attempts(), "Connect failed"),
        }

        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::time::sleep(delay).await;
    }
}

async fn session(
    client: &ChatClient,
    stream: WsStream,
    outbound: &mut mpsc::Receiver<ClientEvent>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_json(&text) {
                    Ok(event) => client.handle_server_event(event),
                    Err(e) => warn!(error = %e, "Ignoring malformed server frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Dropped("closed by server".into());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
            },
            next = outbound.recv() => match next {
                Some(event) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::OutboundClosed;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2));
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(151));

        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200));

        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(2));
        }

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(151));
    }
}
