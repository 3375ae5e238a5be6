pub mod chat;
pub mod health;
pub mod jobs;
pub mod models;
pub mod slack;
pub mod stop;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::core::jobs::DispatchError;
use crate::interfaces::slack::WebhookError;

/// Every handler failure leaves as `{"error": "..."}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error("{}", .0.body_text())]
    Body(#[from] JsonRejection),
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),
    #[error("Job {0} is not active")]
    JobNotActive(String),
    #[error("Result store error: {0:#}")]
    Store(anyhow::Error),
    #[error("Backend error: {0:#}")]
    Backend(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Dispatch(DispatchError::EmptyText) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(DispatchError::Store(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Webhook(WebhookError::InvalidSignature) => StatusCode::UNAUTHORIZED,
            ApiError::Webhook(WebhookError::InvalidPayload) => StatusCode::BAD_REQUEST,
            ApiError::Body(rejection) => rejection.status(),
            ApiError::InvalidJobId(_) => StatusCode::BAD_REQUEST,
            ApiError::JobNotActive(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
