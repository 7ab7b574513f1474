//! Metrics and instrumentation for the ledger node.
//!
//! This module defines Prometheus-compatible metrics for the ledger and
//! exposes a small HTTP exporter that serves `/metrics` in Prometheus text
//! format. The registry implements [`crate::protocol::LedgerObserver`], so
//! it is fed by the protocol layer's state transitions rather than by the
//! engine itself.
//!
//! Typical usage in a node:
//!
//! ```ignore
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use ledger::metrics::{MetricsRegistry, run_prometheus_http_server};
//!
//! let registry = Arc::new(MetricsRegistry::new()?);
//! let addr: SocketAddr = "127.0.0.1:9898".parse()?;
//!
//! // Spawn the HTTP exporter in the background:
//! tokio::spawn(run_prometheus_http_server(registry.clone(), addr));
//!
//! // Hand the same registry to the node as its observer.
//! ```

pub mod prometheus;

pub use prometheus::{LedgerMetrics, MetricsRegistry, run_prometheus_http_server};
