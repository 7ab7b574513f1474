//! Ledger library crate.
//!
//! This crate provides the building blocks of a peer-to-peer ledger for a
//! micro-grid energy-trading network: prosumers trade electricity under
//! signed contracts, and a reputation-weighted set of validators
//! countersigns and admits new ledger entries.
//!
//! - strongly-typed domain types and canonical hashing (`types`),
//! - the signing identity capability (`identity`),
//! - the ledger engine and chain state (`consensus`),
//! - block validity predicates (`validation`),
//! - storage backends (`storage`),
//! - the peer protocol and node context (`protocol`),
//! - the peer table and TCP transport (`network`),
//! - Prometheus-based metrics (`metrics`),
//! - node configuration and startup (`config`, `runtime`).

pub mod config;
pub mod consensus;
pub mod identity;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod runtime;
pub mod storage;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testutil;

// Re-export top-level configuration types.
pub use config::{ConfigError, MetricsConfig, NetworkConfig, NodeConfig};

// Re-export "core" consensus types and traits.
pub use consensus::{
    AcceptAllValidator, Admission, BlockValidator, Chain, CombinedValidator, ConsensusConfig,
    ConsensusError, GenesisConfig, LedgerEngine, Stage, StructuralError, ValidationError,
};

pub use identity::{Ed25519Verifier, Identity, IdentityError, SignatureVerifier, Wallet};

// Re-export storage backends.
pub use storage::{
    InMemoryStore, KeyValueStore, LedgerStore, RocksDbConfig, RocksDbStore, StorageError,
};

pub use protocol::{
    AdmissionConfig, DriverConfig, Envelope, LedgerObserver, MessageKind, Node, NodeSettings,
    NoopObserver, ProtocolError,
};

pub use validation::{RotationValidity, SignatureValidity};

// Re-export metrics registry and ledger metrics.
pub use metrics::{LedgerMetrics, MetricsRegistry, run_prometheus_http_server};

pub use runtime::{StartError, start_node};

// Re-export domain types at the crate root for convenience.
pub use types::*;

/// Type alias for the validity predicate used by every node.
///
/// This composes:
///
/// - [`SignatureValidity`] for registry, reputation and signature checks,
/// - [`RotationValidity`] for the anti-concentration rule.
pub type DefaultBlockValidator = CombinedValidator<SignatureValidity<Ed25519Verifier>, RotationValidity>;

/// Type alias for the default ledger engine stack.
pub type DefaultLedgerEngine = LedgerEngine<DefaultBlockValidator, Ed25519Verifier>;
