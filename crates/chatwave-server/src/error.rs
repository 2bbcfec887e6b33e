use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chatwave_shared::error::ChatError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Chat(err) => match err {
                ChatError::Authentication(_) => StatusCode::UNAUTHORIZED,
                ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
                ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::TransientStore(_) | ChatError::NetworkPartition(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ChatError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ServerError::Chat(ChatError::TransientStore(_)) => {
                "Store temporarily unavailable".to_string()
            }
            ServerError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let mut body = serde_json::json!({
            "error": message,
        });
        if let ServerError::Chat(err) = &self {
            body["code"] = serde_json::json!(err.code());
        }

        (status, axum::Json(body)).into_response()
    }
}
