use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::warn;

use super::super::AppState;
use super::ApiError;

#[derive(serde::Deserialize, serde::Serialize)]
pub struct StopFlagBody {
    active: bool,
}

pub async fn get_stop_endpoint(State(state): State<AppState>) -> Result<Json<StopFlagBody>, ApiError> {
    let active = state
        .dispatcher
        .stop_flag()
        .is_set()
        .await
        .map_err(ApiError::Store)?;
    Ok(Json(StopFlagBody { active }))
}

pub async fn set_stop_endpoint(
    State(state): State<AppState>,
    payload: Result<Json<StopFlagBody>, JsonRejection>,
) -> Result<Json<StopFlagBody>, ApiError> {
    let Json(payload) = payload?;
    state
        .dispatcher
        .stop_flag()
        .set(payload.active)
        .await
        .map_err(ApiError::Store)?;
    if payload.active {
        warn!("Stop flag raised: new jobs are rejected until it is cleared");
    } else {
        warn!("Stop flag cleared");
    }
    Ok(Json(payload))
}
