//! Client configuration loaded from environment variables.

use std::time::Duration;

use chatwave_shared::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_HTTP_PORT};
use chatwave_shared::types::UserId;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP URL of the server.
    /// Env: `CHATWAVE_SERVER_URL`
    pub server_url: String,

    /// Bearer token presented on connect and on history requests.
    /// Env: `CHATWAVE_TOKEN`
    pub token: String,

    /// The signed-in user.
    /// Env: `CHATWAVE_USER_ID`
    pub user_id: Option<UserId>,

    /// Maximum number of chats kept in memory.
    /// Env: `CHATWAVE_CACHE_CAPACITY`
    pub cache_capacity: usize,

    /// A chat older than this is refetched by the sweeper.
    /// Env: `CHATWAVE_STALE_SECS`
    pub stale_after: Duration,

    /// Sweeper tick.
    /// Env: `CHATWAVE_SWEEP_SECS`
    pub sweep_interval: Duration,

    /// A send without acknowledgment after this long is marked failed.
    /// Env: `CHATWAVE_SEND_TIMEOUT_SECS`
    pub send_timeout: Duration,

    /// Page size for history fetches.
    pub page_size: u32,

    /// Reconnect backoff bounds.
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            token: String::new(),
            user_id: None,
            cache_capacity: 64,
            stale_after: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            send_timeout: Duration::from_secs(15),
            page_size: DEFAULT_HISTORY_LIMIT,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CHATWAVE_SERVER_URL") {
            if !url.trim().is_empty() {
                config.server_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Ok(token) = std::env::var("CHATWAVE_TOKEN") {
            config.token = token.trim().to_string();
        }

        if let Ok(raw) = std::env::var("CHATWAVE_USER_ID") {
            match raw.trim().parse::<UserId>() {
                Ok(id) => config.user_id = Some(id),
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid CHATWAVE_USER_ID"),
            }
        }

        if let Some(n) = parse_var::<usize>("CHATWAVE_CACHE_CAPACITY") {
            if n > 0 {
                config.cache_capacity = n;
            }
        }
        if let Some(secs) = parse_var::<u64>("CHATWAVE_STALE_SECS") {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("CHATWAVE_SWEEP_SECS") {
            if secs > 0 {
                config.sweep_interval = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = parse_var::<u64>("CHATWAVE_SEND_TIMEOUT_SECS") {
            if secs > 0 {
                config.send_timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    /// WebSocket endpoint derived from `server_url`.
    pub fn ws_url(&self) -> Result<String, ClientError> {
        let base = self.server_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            Ok(format!("wss://{rest}/ws"))
        } else if let Some(rest) = base.strip_prefix("http://") {
            Ok(format!("ws://{rest}/ws"))
        } else {
            Err(ClientError::InvalidUrl(base.to_string()))
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        let mut config = ClientConfig {
            server_url: "https://chat.example.org/".into(),
            ..ClientConfig::default()
        };
        assert_eq!(config.ws_url().unwrap(), "wss://chat.example.org/ws");

        config.server_url = "http://127.0.0.1:8080".into();
        assert_eq!(config.ws_url().unwrap(), "ws://127.0.0.1:8080/ws");

        config.server_url = "ftp://nope".into();
        assert!(config.ws_url().is_err());
    }
}
