//! Prometheus-backed metrics and HTTP exporter.
//!
//! This module defines a [`MetricsRegistry`] that owns a Prometheus
//! registry and a set of strongly-typed ledger metrics, and an async HTTP
//! exporter that serves `/metrics` using `hyper`.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::warn;

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

use crate::consensus::ConsensusError;
use crate::protocol::LedgerObserver;
use crate::types::{Address, Block, Validator};

/// Ledger-related Prometheus metrics.
///
/// These are registered into a [`Registry`] and updated through the
/// [`LedgerObserver`] implementation of [`MetricsRegistry`].
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Blocks appended to the local chain.
    pub blocks_appended: IntCounter,
    /// Blocks refused by `add_block` (structural or validation failure).
    pub blocks_rejected: IntCounter,
    /// Validators newly inserted into the registry.
    pub validators_admitted: IntCounter,
    /// Admission requests this node saw rejected.
    pub admissions_rejected: IntCounter,
    /// Full-state replacements adopted from a peer.
    pub syncs_completed: IntCounter,
    /// Current chain height.
    pub chain_height: IntGauge,
    /// Latency of `add_block` (structural checks + predicate), in seconds.
    pub block_validation_seconds: Histogram,
}

impl LedgerMetrics {
    /// Registers ledger metrics into the given `Registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let blocks_appended = IntCounter::with_opts(Opts::new(
            "blocks_appended_total",
            "Total number of blocks appended to the local chain",
        ))?;
        registry.register(Box::new(blocks_appended.clone()))?;

        let blocks_rejected = IntCounter::with_opts(Opts::new(
            "blocks_rejected_total",
            "Total number of blocks refused by the ledger engine",
        ))?;
        registry.register(Box::new(blocks_rejected.clone()))?;

        let validators_admitted = IntCounter::with_opts(Opts::new(
            "validators_admitted_total",
            "Total number of validators added to the registry",
        ))?;
        registry.register(Box::new(validators_admitted.clone()))?;

        let admissions_rejected = IntCounter::with_opts(Opts::new(
            "admissions_rejected_total",
            "Total number of rejected validator admission requests",
        ))?;
        registry.register(Box::new(admissions_rejected.clone()))?;

        let syncs_completed = IntCounter::with_opts(Opts::new(
            "syncs_completed_total",
            "Total number of chain replacements adopted from peers",
        ))?;
        registry.register(Box::new(syncs_completed.clone()))?;

        let chain_height = IntGauge::with_opts(Opts::new(
            "chain_height",
            "Index of the current chain tip",
        ))?;
        registry.register(Box::new(chain_height.clone()))?;

        let block_validation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "block_validation_seconds",
                "Time to check and append a block in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(block_validation_seconds.clone()))?;

        Ok(Self {
            blocks_appended,
            blocks_rejected,
            validators_admitted,
            admissions_rejected,
            syncs_completed,
            chain_height,
            block_validation_seconds,
        })
    }
}

/// Wrapper around a Prometheus registry and the ledger metrics.
///
/// This is the main handle you pass around in the node. It can be wrapped
/// in an [`Arc`] and shared across tasks, and doubles as the node's
/// metrics observer.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    pub ledger: LedgerMetrics,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with a fresh underlying `Registry`
    /// and registers the ledger metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ledger".to_string()), None)?;
        let ledger = LedgerMetrics::register(&registry)?;
        Ok(Self { registry, ledger })
    }

    /// Encodes all metrics in this registry into the Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "failed to encode Prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl LedgerObserver for MetricsRegistry {
    fn block_appended(&self, block: &Block, elapsed: Duration) {
        self.ledger.blocks_appended.inc();
        self.ledger
            .chain_height
            .set(i64::try_from(block.index).unwrap_or(i64::MAX));
        self.ledger
            .block_validation_seconds
            .observe(elapsed.as_secs_f64());
    }

    fn block_rejected(&self, _block: &Block, _error: &ConsensusError) {
        self.ledger.blocks_rejected.inc();
    }

    fn validator_admitted(&self, _validator: &Validator) {
        self.ledger.validators_admitted.inc();
    }

    fn admission_rejected(&self, _approver: &Address) {
        self.ledger.admissions_rejected.inc();
    }

    fn sync_completed(&self, _from: &Address, height: u64) {
        self.ledger.syncs_completed.inc();
        self.ledger
            .chain_height
            .set(i64::try_from(height).unwrap_or(i64::MAX));
    }
}

/// Runs an HTTP server that exposes Prometheus metrics.
///
/// The server listens on `addr` and serves `GET /metrics` with the
/// Prometheus text exposition format. All other paths return 404.
///
/// This function is `async` and is intended to be spawned onto a Tokio
/// runtime, e.g.:
///
/// ```ignore
/// let registry = Arc::new(MetricsRegistry::new()?);
/// let addr: SocketAddr = "127.0.0.1:9898".parse()?;
/// tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
/// ```
pub async fn run_prometheus_http_server(
    metrics: Arc<MetricsRegistry>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let metrics = metrics.clone();
                handle_request(req, metrics)
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                warn!(error = %err, "prometheus HTTP server error");
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut resp = Response::new(Full::new(Bytes::from(metrics.gather_text())));
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from("not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{chain_with, reputation_block, wallet};
    use prometheus::Registry;

    #[test]
    fn ledger_metrics_register_and_record() {
        let registry = Registry::new();
        let metrics = LedgerMetrics::register(&registry).expect("register metrics");

        metrics.block_validation_seconds.observe(0.002);
        metrics.blocks_appended.inc();
        metrics.chain_height.set(3);

        let metric_families = registry.gather();
        assert!(!metric_families.is_empty());
    }

    #[test]
    fn observer_events_drive_counters() {
        let registry = MetricsRegistry::new().expect("create metrics registry");
        let v0 = wallet(1);
        let chain = chain_with(&[(&v0, 10.0)]);
        let block = reputation_block(&chain, &v0);

        registry.block_appended(&block, Duration::from_millis(2));
        registry.sync_completed(&Address::new("peer"), 7);
        registry.admission_rejected(&Address::new("peer"));

        assert_eq!(registry.ledger.blocks_appended.get(), 1);
        assert_eq!(registry.ledger.syncs_completed.get(), 1);
        assert_eq!(registry.ledger.admissions_rejected.get(), 1);
        assert_eq!(registry.ledger.chain_height.get(), 7);

        let text = registry.gather_text();
        assert!(text.contains("ledger_blocks_appended_total"));
        assert!(text.contains("ledger_block_validation_seconds"));
    }
}
