use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use super::super::AppState;
use super::ApiError;
use crate::core::jobs::JobId;

pub async fn active_jobs_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let jobs = state.dispatcher.active().snapshot();
    Json(serde_json::json!({ "count": jobs.len(), "jobs": jobs }))
}

pub async fn cancel_job_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId::parse(&job_id).ok_or_else(|| ApiError::InvalidJobId(job_id.clone()))?;
    if !state.dispatcher.active().cancel(&id) {
        return Err(ApiError::JobNotActive(job_id));
    }
    info!("Cancellation requested for job {}", id);
    Ok(Json(
        serde_json::json!({ "job_id": id, "status": "cancelling" }),
    ))
}
