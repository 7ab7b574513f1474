//! Shared application state.

use std::sync::Arc;

use ledger::{MetricsRegistry, Node};

/// Shared state held by the API handlers.
///
/// This is wrapped in an [`Arc`] and passed to request handlers via Axum's
/// `State` extractor. The node serialises access to its own ledger state,
/// so no extra lock is needed here.
pub struct AppState {
    /// Embedded ledger node (store + engine + peer protocol).
    pub node: Arc<Node>,
    /// Metrics registry shared between the node and the exporter.
    pub metrics: Arc<MetricsRegistry>,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
