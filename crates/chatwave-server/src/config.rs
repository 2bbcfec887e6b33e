//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use chatwave_shared::constants::{DEFAULT_HISTORY_LIMIT, DEFAULT_HTTP_PORT, DEFAULT_SESSION_QUEUE};
use chatwave_shared::types::UserId;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database holding chats, participants and messages.
    /// Env: `DATABASE_PATH`
    /// Default: `./chatwave.db`
    pub database_path: PathBuf,

    /// Static bearer tokens accepted by the gateway.
    /// Env: `AUTH_TOKENS` as `token=user-uuid,token2=user-uuid2`
    /// Default: empty (every connection is refused).
    pub auth_tokens: HashMap<String, UserId>,

    /// Capacity of each session's outbound event queue.
    /// Env: `SESSION_QUEUE_CAPACITY`
    pub session_queue_capacity: usize,

    /// Upper bound for `limit` on the history endpoint.
    /// Env: `HISTORY_MAX_LIMIT`
    pub history_max_limit: u32,

    /// Sustained sends per second allowed per user.
    /// Env: `SEND_RATE_PER_SEC`
    pub send_rate_per_sec: f64,

    /// Burst of sends allowed per user before throttling.
    /// Env: `SEND_BURST`
    pub send_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./chatwave.db"),
            auth_tokens: HashMap::new(),
            session_queue_capacity: DEFAULT_SESSION_QUEUE,
            history_max_limit: DEFAULT_HISTORY_LIMIT * 4,
            send_rate_per_sec: 5.0,
            send_burst: 20.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Ok(raw) = std::env::var("AUTH_TOKENS") {
            match parse_auth_tokens(&raw) {
                Ok(tokens) => config.auth_tokens = tokens,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid AUTH_TOKENS, no tokens loaded");
                }
            }
        }

        if let Some(n) = parse_var::<usize>("SESSION_QUEUE_CAPACITY") {
            if n > 0 {
                config.session_queue_capacity = n;
            }
        }

        if let Some(n) = parse_var::<u32>("HISTORY_MAX_LIMIT") {
            if n > 0 {
                config.history_max_limit = n;
            }
        }

        if let Some(rate) = parse_var::<f64>("SEND_RATE_PER_SEC") {
            if rate > 0.0 {
                config.send_rate_per_sec = rate;
            }
        }

        if let Some(burst) = parse_var::<f64>("SEND_BURST") {
            if burst >= 1.0 {
                config.send_burst = burst;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
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

/// Parse `token=uuid` pairs separated by commas.
fn parse_auth_tokens(raw: &str) -> Result<HashMap<String, UserId>, String> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (token, user) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected token=uuid, got {pair:?}"))?;
        let token = token.trim();
        if token.is_empty() {
            return Err("empty token".into());
        }
        let user: UserId = user
            .trim()
            .parse()
            .map_err(|e| format!("invalid user id for token: {e}"))?;
        tokens.insert(token.to_string(), user);
    }
    Ok(tokens)
}
