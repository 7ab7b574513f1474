//! Ledger engine and related abstractions.
//!
//! This module provides a modular, testable consensus layer consisting of:
//!
//! - configuration parameters ([`config::ConsensusConfig`]),
//! - the ledger state ([`chain::Chain`]),
//! - the pluggable validity predicate ([`validator::BlockValidator`]),
//! - and the engine that mutates state ([`engine::LedgerEngine`]).

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod validator;

pub use chain::Chain;
pub use config::{ConsensusConfig, GenesisConfig};
pub use engine::{Admission, LedgerEngine};
pub use error::{ConsensusError, StructuralError, ValidationError};
pub use validator::{AcceptAllValidator, BlockValidator, CombinedValidator, Stage};
