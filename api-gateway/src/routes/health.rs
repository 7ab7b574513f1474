use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::SharedState;

/// Simple health-check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub height: u64,
    pub peers: usize,
}

/// `GET /health`
///
/// Returns a basic JSON document indicating liveness, with the current chain
/// height and number of known peers.
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let height = state.node.height().await;
    let peers = state.node.peers().await.len();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            height,
            peers,
        }),
    )
}

/// `GET /metrics`
///
/// The node's Prometheus registry in text exposition format, served on the
/// API port as well as by the standalone exporter.
pub async fn metrics(State(state): State<SharedState>) -> String {
    state.metrics.gather_text()
}
