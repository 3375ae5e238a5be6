use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::super::AppState;
use super::ApiError;
use crate::core::jobs::{JobId, JobOrigin, JobStatusView, JobTicket, dispatcher::validate_text};

#[derive(serde::Deserialize)]
pub struct TextRequest {
    text: String,
}

pub async fn echo_endpoint(
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload?;
    validate_text(&payload.text)?;
    Ok(Json(serde_json::json!({ "echo": payload.text })))
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<TextRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobTicket>), ApiError> {
    let Json(payload) = payload?;
    let ticket = state
        .dispatcher
        .submit(&payload.text, JobOrigin::Http)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn result_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = JobId::parse(&job_id).ok_or(ApiError::InvalidJobId(job_id))?;
    let view = state.reader.get_result(&id).await.map_err(ApiError::Store)?;
    Ok(Json(view))
}
