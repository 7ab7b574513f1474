// api-gateway/src/main.rs

//! API gateway binary.
//!
//! This binary embeds a ledger node and exposes a small HTTP API on top of
//! it:
//!
//! - `GET /health`, `GET /metrics`
//! - `GET /ledger/blocks`, `/ledger/validators`, `/ledger/address`,
//!   `/ledger/peers`, `/ledger/reputation/{address}`
//! - `POST /actions/buy`, `/actions/admission`, `/actions/sync`,
//!   `/actions/fulfillment`, `/actions/message`
//!
//! The node itself (RocksDB store, TCP peer transport, periodic driver) and
//! a Prometheus metrics exporter on `/metrics` run alongside the API.

mod config;
mod routes;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use config::ApiConfig;
use ledger::{
    Identity, MetricsRegistry, NodeConfig, run_prometheus_http_server, runtime, start_node,
};
use routes::{actions, health, ledger as ledger_routes};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() {
    // Basic tracing setup.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("api_gateway=info,ledger=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let api_cfg = ApiConfig::from_env()?;
    let node_cfg = NodeConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;

    // ---------------------------
    // Metrics
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if node_cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = node_cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::warn!("metrics HTTP server error: {e}");
            }
        });
        tracing::info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Embedded ledger node
    // ---------------------------

    let wallet = runtime::load_identity(&node_cfg).map_err(|e| e.to_string())?;
    tracing::info!(address = %wallet.address(), "node identity loaded");

    let node = start_node(&node_cfg, Arc::new(wallet), metrics.clone())
        .await
        .map_err(|e| e.to_string())?;

    let app_state: SharedState = Arc::new(AppState {
        node,
        metrics: metrics.clone(),
    });

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .route("/ledger/blocks", get(ledger_routes::blocks))
        .route("/ledger/validators", get(ledger_routes::validators))
        .route("/ledger/address", get(ledger_routes::address))
        .route("/ledger/peers", get(ledger_routes::peers))
        .route("/ledger/reputation/{address}", get(ledger_routes::reputation))
        .route("/actions/buy", post(actions::buy))
        .route("/actions/admission", post(actions::admission))
        .route("/actions/sync", post(actions::sync))
        .route("/actions/fulfillment", post(actions::fulfillment))
        .route("/actions/message", post(actions::message))
        .with_state(app_state);

    // ---------------------------
    // axum 0.8 server (hyper 1 / tokio 1.48 style)
    // ---------------------------

    tracing::info!("API gateway listening on http://{}", api_cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(api_cfg.listen_addr)
        .await
        .map_err(|e| format!("failed to bind {}: {e}", api_cfg.listen_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    Ok(())
}

/// Waits for Ctrl-C and returns, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
