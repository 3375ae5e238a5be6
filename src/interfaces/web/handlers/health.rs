use axum::Json;

pub async fn root_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Hello, World!" }))
}
