// src/handlers/health.rs

use axum::{Json, response::IntoResponse};
use serde_json::json;

/// Liveness check. Does not touch storage.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
