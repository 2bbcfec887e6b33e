use std::net::IpAddr;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, Method},
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use chatwave_shared::constants::{DEFAULT_HISTORY_LIMIT, PROTOCOL_VERSION};
use chatwave_shared::error::ChatError;
use chatwave_shared::models::{ChatSummary, Cursor, Message};
use chatwave_shared::types::{ChatId, MessageId, UserId};

use crate::auth::extract_credential;
use crate::error::ServerError;
use crate::gateway::Gateway;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub history_max_limit: u32,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .route("/chats/{chat_id}", get(chat_summary))
        .route("/chats/{chat_id}/messages", get(list_messages))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    /// Microseconds since the epoch of the cursor message.
    after_ts: Option<i64>,
    after_id: Option<MessageId>,
    limit: Option<u32>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn authorize(
    gateway: &Gateway,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserId, ServerError> {
    let credential = extract_credential(headers, query_token)
        .ok_or_else(|| ChatError::Authentication("missing bearer token".into()))?;
    Ok(gateway.authenticate(&credential).await?)
}

/// Authentication happens before the upgrade so a bad token gets a plain
/// 401 instead of an open socket.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user_id = authorize(&state.gateway, &headers, query.token.as_deref()).await?;
    let gateway = state.gateway.clone();

    Ok(ws.on_upgrade(move |socket| crate::ws::handle_connection(socket, gateway, user_id)))
}

async fn chat_summary(
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
    State(state): State<AppState>,
) -> Result<Json<ChatSummary>, ServerError> {
    let user_id = authorize(&state.gateway, &headers, None).await?;
    let chat = state.gateway.store().get_chat(chat_id).await?;
    if !chat.has_participant(&user_id) {
        return Err(ChatError::Forbidden("not a participant of this chat".into()).into());
    }
    Ok(Json(chat.summary()))
}

async fn list_messages(
    headers: HeaderMap,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user_id = authorize(&state.gateway, &headers, None).await?;
    let store = state.gateway.store();

    if !store.is_participant(chat_id, user_id).await? {
        return Err(ChatError::Forbidden("not a participant of this chat".into()).into());
    }

    let cursor = match (query.after_ts, query.after_id) {
        (Some(us), Some(id)) => {
            let created_at = DateTime::from_timestamp_micros(us)
                .ok_or_else(|| ServerError::BadRequest("after_ts out of range".into()))?;
            Some(Cursor { created_at, id })
        }
        (None, None) => None,
        _ => {
            return Err(ServerError::BadRequest(
                "after_ts and after_id must be given together".into(),
            ))
        }
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, state.history_max_limit.max(1));

    let messages = store.list_since(chat_id, cursor, limit).await?;
    info!(chat = %chat_id, user = %user_id, count = messages.len(), "History served");
    Ok(Json(messages))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
