//! Connection authentication.
//!
//! The gateway never interprets credentials itself: it hands the bearer
//! string to an [`Authenticator`] and gets back a user id or an
//! authentication error. [`TokenTable`] is the shipped implementation, a
//! table of static tokens with optional expiry loaded from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use chatwave_shared::error::ChatError;
use chatwave_shared::types::UserId;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a bearer credential to the user it belongs to.
    async fn verify(&self, credential: &str) -> Result<UserId, ChatError>;
}

// ---------------------------------------------------------------------------
// Token entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TokenEntry {
    user_id: UserId,
    /// `None` means the token never expires.
    expires_at: Option<DateTime<Utc>>,
}

impl TokenEntry {
    fn is_fresh(&self) -> bool {
        self.expires_at.map_or(true, |at| Utc::now() < at)
    }
}

// ---------------------------------------------------------------------------
// Token table
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct TokenTable {
    tokens: Arc<RwLock<HashMap<String, TokenEntry>>>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table of non-expiring tokens.
    pub fn from_map(map: &HashMap<String, UserId>) -> Self {
        let tokens = map
            .iter()
            .map(|(token, user_id)| {
                (
                    token.clone(),
                    TokenEntry {
                        user_id: *user_id,
                        expires_at: None,
                    },
                )
            })
            .collect();
        Self {
            tokens: Arc::new(RwLock::new(tokens)),
        }
    }

    pub async fn grant(
        &self,
        token: impl Into<String>,
        user_id: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.into(), TokenEntry { user_id, expires_at });
        info!(user = %user_id, expires = ?expires_at, "Token granted");
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.tokens.write().await.remove(token).is_some()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Evict expired tokens.
    pub async fn purge_expired(&self) {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, entry| entry.is_fresh());
        let removed = before - tokens.len();
        if removed > 0 {
            debug!(removed, "Purged expired tokens");
        }
    }
}

#[async_trait]
impl Authenticator for TokenTable {
    async fn verify(&self, credential: &str) -> Result<UserId, ChatError> {
        let tokens = self.tokens.read().await;
        match tokens.get(credential) {
            Some(entry) if entry.is_fresh() => Ok(entry.user_id),
            Some(_) => Err(ChatError::Authentication("token expired".into())),
            None => Err(ChatError::Authentication("unknown token".into())),
        }
    }
}

/// Pull the bearer credential from the `Authorization` header, falling back
/// to a `token` query parameter for browser clients that cannot set headers
/// on a WebSocket upgrade.
pub fn extract_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    from_header
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
}
