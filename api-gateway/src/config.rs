//! API gateway configuration.
//!
//! The HTTP listen address comes from `API_LISTEN_ADDR`; the embedded node
//! is configured through `ledger::NodeConfig::from_env()`.

use std::net::SocketAddr;

/// Configuration for the API gateway HTTP server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        // Bind to all interfaces so a container port mapping (8081->8081) is
        // reachable from the host.
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

impl ApiConfig {
    /// Defaults overlaid with `API_LISTEN_ADDR`.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self::default();
        if let Ok(addr) = std::env::var("API_LISTEN_ADDR") {
            cfg.listen_addr = addr
                .parse()
                .map_err(|e| format!("invalid API_LISTEN_ADDR {addr:?}: {e}"))?;
        }
        Ok(cfg)
    }
}
