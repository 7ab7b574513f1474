//! Top-level configuration for a ledger node.
//!
//! This module aggregates configuration for:
//!
//! - consensus parameters (`ConsensusConfig`: the genesis validator),
//! - storage (RocksDB path and creation flags),
//! - the peer transport (listen address, advertised host, bootstrap peers),
//! - validator admission (`AdmissionConfig`),
//! - the periodic driver (`DriverConfig`),
//! - metrics exporter (enable flag + listen address).
//!
//! Everything has a default; [`NodeConfig::from_env`] overlays a handful of
//! `LEDGER_*` environment variables so several nodes can run side by side.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::consensus::ConsensusConfig;
use crate::network::tcp::DEFAULT_MAX_FRAME_LENGTH;
use crate::protocol::{AdmissionConfig, DriverConfig};
use crate::storage::RocksDbConfig;
use crate::types::Address;

/// Configuration for the Prometheus metrics exporter.
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Whether to run a `/metrics` HTTP exporter.
    pub enabled: bool,
    /// Address to bind the metrics HTTP server to.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9898)),
        }
    }
}

/// Configuration for the peer transport.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Address the peer listener binds to.
    pub listen_addr: SocketAddr,
    /// Host advertised to peers in handshakes.
    pub advertised_host: String,
    /// `host:port` of peers to dial at startup.
    pub bootstrap: Vec<String>,
    /// Largest length-delimited frame accepted on a peer connection, in
    /// bytes. Must fit a full sync response.
    pub max_frame_length: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            advertised_host: "127.0.0.1".to_string(),
            bootstrap: Vec::new(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Top-level configuration for a ledger node.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub storage: RocksDbConfig,
    pub network: NetworkConfig,
    pub admission: AdmissionConfig,
    pub driver: DriverConfig,
    pub metrics: MetricsConfig,
    /// Hex-encoded ed25519 secret key. A fresh key is generated if unset.
    pub secret_key: Option<String>,
}

/// A `LEDGER_*` variable holds a value that does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value {:?} for {}", self.value, self.var)
    }
}

impl std::error::Error for ConfigError {}

impl NodeConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for:
    ///
    /// - `LEDGER_LISTEN_ADDR`, `LEDGER_ADVERTISED_HOST`,
    /// - `LEDGER_PEERS` (comma-separated `host:port` list),
    /// - `LEDGER_MAX_FRAME_BYTES`,
    /// - `LEDGER_DB_PATH`, `LEDGER_SECRET_KEY`, `LEDGER_GENESIS_VALIDATOR`,
    /// - `LEDGER_METRICS_ADDR`, `LEDGER_METRICS` and `LEDGER_DRIVER` (booleans),
    /// - `LEDGER_DRIVER_TICK_MS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(addr) = parse(&lookup, "LEDGER_LISTEN_ADDR")? {
            cfg.network.listen_addr = addr;
        }
        if let Some(host) = lookup("LEDGER_ADVERTISED_HOST") {
            cfg.network.advertised_host = host;
        }
        if let Some(peers) = lookup("LEDGER_PEERS") {
            cfg.network.bootstrap = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(bytes) = parse(&lookup, "LEDGER_MAX_FRAME_BYTES")? {
            cfg.network.max_frame_length = bytes;
        }
        if let Some(path) = lookup("LEDGER_DB_PATH") {
            cfg.storage.path = path;
        }
        if let Some(key) = lookup("LEDGER_SECRET_KEY") {
            cfg.secret_key = Some(key);
        }
        if let Some(validator) = lookup("LEDGER_GENESIS_VALIDATOR") {
            cfg.consensus.genesis.validator = Some(Address::new(validator));
        }
        if let Some(addr) = parse(&lookup, "LEDGER_METRICS_ADDR")? {
            cfg.metrics.listen_addr = addr;
        }
        if let Some(enabled) = parse(&lookup, "LEDGER_METRICS")? {
            cfg.metrics.enabled = enabled;
        }
        if let Some(enabled) = parse(&lookup, "LEDGER_DRIVER")? {
            cfg.driver.enabled = enabled;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "LEDGER_DRIVER_TICK_MS")? {
            cfg.driver.tick = std::time::Duration::from_millis(ms);
        }

        Ok(cfg)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}
