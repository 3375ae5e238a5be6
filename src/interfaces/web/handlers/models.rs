use axum::{Json, extract::State};

use super::super::AppState;
use super::ApiError;

pub async fn list_models_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let models = state
        .backend
        .list_models()
        .await
        .map_err(ApiError::Backend)?;
    Ok(Json(serde_json::json!({
        "backend": state.backend.name(),
        "models": models
    })))
}
