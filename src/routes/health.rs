use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Root endpoint - basic status
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "IPTV Aggregator",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "runtime": "rust"
    }))
}

/// Last run, as seen by the health check
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastRun {
    run_id: String,
    state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    finished_at: Option<i64>,
    published: usize,
}

/// Health check response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    uptime: u64,
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<LastRun>,
}

/// GET /health - Pipeline health check
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let latest = state.orchestrator.latest().await;

    // Degraded when the last run failed; previous playlists are still served
    let status = match latest {
        Some(ref summary) if !summary.is_success() => "degraded",
        _ => "ok",
    };

    let health = HealthResponse {
        status: status.to_string(),
        uptime,
        running: state.orchestrator.is_running(),
        last_run: latest.map(|summary| LastRun {
            published: summary.published(),
            run_id: summary.run_id,
            state: summary.state.to_string(),
            finished_at: summary.finished_at,
        }),
    };

    Json(health)
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}

/// Readiness probe (for Kubernetes)
///
/// Ready once every enabled tier has a published playlist.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let publish_dir = state.orchestrator.publish_dir();
    let mut missing = Vec::new();
    for output in state.config.expected_outputs() {
        if !tokio::fs::try_exists(publish_dir.join(&output.file))
            .await
            .unwrap_or(false)
        {
            missing.push(output.file);
        }
    }

    if missing.is_empty() {
        (StatusCode::OK, "ready".to_string())
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("not ready - missing {}", missing.join(", ")),
        )
    }
}

/// Liveness probe (for Kubernetes)
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}
