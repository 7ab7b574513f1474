// src/main.rs
//
// Ledger node binary:
//
// - configuration from LEDGER_* environment variables
// - Prometheus metrics exporter on /metrics
// - RocksDB-backed ledger, TCP peer transport, periodic driver
// - runs until Ctrl-C.

use std::sync::Arc;

use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ledger::{
    Identity, MetricsRegistry, NodeConfig, run_prometheus_http_server, runtime, start_node,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ledger=info,node=info")),
        )
        .init();

    if let Err(err) = run_node().await {
        eprintln!("fatal error: {err}");
        std::process::exit(1);
    }
}

async fn run_node() -> Result<(), String> {
    let cfg = NodeConfig::from_env().map_err(|e| format!("invalid configuration: {e}"))?;

    // ---------------------------
    // Metrics registry + exporter
    // ---------------------------

    let metrics = Arc::new(
        MetricsRegistry::new()
            .map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );

    if cfg.metrics.enabled {
        let metrics_clone = metrics.clone();
        let addr = cfg.metrics.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics_clone, addr).await {
                tracing::warn!("metrics HTTP server error: {e}");
            }
        });
        info!("metrics exporter listening on http://{}/metrics", addr);
    }

    // ---------------------------
    // Identity + node
    // ---------------------------

    let wallet = runtime::load_identity(&cfg).map_err(|e| e.to_string())?;
    info!(address = %wallet.address(), "node identity loaded");

    let node = start_node(&cfg, Arc::new(wallet), metrics)
        .await
        .map_err(|e| e.to_string())?;

    info!(
        listen = %cfg.network.listen_addr,
        peers = cfg.network.bootstrap.len(),
        driver = cfg.driver.enabled,
        "node running"
    );

    let _ = signal::ctrl_c().await;
    info!(height = node.height().await, "shutdown signal received");
    Ok(())
}
