use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::AppState;

/// GET /api/runs/latest - Summary of the last finished run
pub async fn latest_run(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.latest().await {
        Some(summary) => (StatusCode::OK, Json(serde_json::to_value(summary).unwrap_or_default())),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no run has finished yet" })),
        ),
    }
}
