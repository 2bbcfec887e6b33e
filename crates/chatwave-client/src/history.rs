//! Fetching message history and chat details from the server.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use chatwave_shared::error::{ChatError, ErrorCode};
use chatwave_shared::models::{ChatSummary, Cursor, Message};
use chatwave_shared::types::ChatId;

use crate::error::ClientError;

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Messages strictly after `cursor`, ascending, at most `limit`.
    async fn fetch_since(
        &self,
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ClientError>;

    /// Name, avatar and members of a chat. Sources without chat details
    /// return `None`.
    async fn fetch_chat(&self, _chat_id: ChatId) -> Result<Option<ChatSummary>, ClientError> {
        Ok(None)
    }
}

/// History over the server's HTTP endpoint.
#[derive(Clone)]
pub struct HttpHistory {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: ErrorCode,
}

impl HttpHistory {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, chat_id: ChatId) -> String {
        format!("{}/messages", self.chat_url(chat_id))
    }

    fn chat_url(&self, chat_id: ChatId) -> String {
        format!("{}/chats/{}", self.base_url, chat_id)
    }

    async fn get(&self, url: String, query: &[(&str, String)]) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| ChatError::NetworkPartition(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, &body).into());
        }
        Ok(response)
    }
}

fn query_params(cursor: Option<&Cursor>, limit: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", limit.to_string())];
    if let Some(cursor) = cursor {
        params.push(("after_ts", cursor.created_at.timestamp_micros().to_string()));
        params.push(("after_id", cursor.id.to_string()));
    }
    params
}

fn error_from_response(status: StatusCode, body: &str) -> ChatError {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return ChatError::from_wire(parsed.code, parsed.error);
    }
    let detail = format!("history request failed with {status}");
    match status {
        StatusCode::UNAUTHORIZED => ChatError::Authentication(detail),
        StatusCode::FORBIDDEN => ChatError::Forbidden(detail),
        StatusCode::NOT_FOUND => ChatError::NotFound(detail),
        StatusCode::BAD_REQUEST => ChatError::Validation(detail),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
        _ => ChatError::NetworkPartition(detail),
    }
}

#[async_trait]
impl HistorySource for HttpHistory {
    async fn fetch_since(
        &self,
        chat_id: ChatId,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Vec<Message>, ClientError> {
        let response = self
            .get(self.url(chat_id), &query_params(cursor.as_ref(), limit))
            .await?;
        let messages: Vec<Message> = response.json().await?;
        debug!(chat = %chat_id, count = messages.len(), "Fetched history page");
        Ok(messages)
    }

    async fn fetch_chat(&self, chat_id: ChatId) -> Result<Option<ChatSummary>, ClientError> {
        let response = self.get(self.chat_url(chat_id), &[]).await?;
        Ok(Some(response.json().await?))
    }
}
