use axum::{Json, body::Bytes, extract::State, http::HeaderMap};

use super::super::AppState;
use super::ApiError;
use crate::interfaces::slack::WebhookAck;

pub async fn slack_events_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    // The route is only mounted when a bridge exists.
    let Some(bridge) = state.slack.as_ref() else {
        return Ok(Json(serde_json::json!({ "status": "ok" })));
    };

    match bridge.handle(&headers, &body).await? {
        WebhookAck::Challenge(challenge) => Ok(Json(serde_json::json!({ "challenge": challenge }))),
        WebhookAck::Ok => Ok(Json(serde_json::json!({ "status": "ok" }))),
    }
}
