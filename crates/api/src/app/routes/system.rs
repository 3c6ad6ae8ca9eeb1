use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::app::errors::json_error;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true, "status": "ok" })))
}

pub async fn not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "route not found")
}
