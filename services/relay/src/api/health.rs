//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::pipeline::PipelineStats;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// "ok" or "draining".
    pub status: &'static str,
    pub topic: String,
    pub registrations: usize,
    pub pipeline: PipelineStats,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Liveness: 200 whenever the process is serving.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "docrelay-relay",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness: 503 once shutdown has started.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let relay = state.relay();
    let draining = state.is_draining();
    let body = ReadyResponse {
        status: if draining { "draining" } else { "ok" },
        topic: relay.topic().to_string(),
        registrations: relay.registry().len(),
        pipeline: relay.stats(),
    };
    let status = if draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}
