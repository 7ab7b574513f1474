//! Notification hooks for ledger state transitions.
//!
//! The protocol layer reports what happened to whoever is interested
//! (metrics, a UI, tests) through [`LedgerObserver`]. Observers are called
//! while the node lock is held, so implementations must be quick and must
//! not call back into the node.

use std::time::Duration;

use crate::consensus::ConsensusError;
use crate::types::{Address, Block, Contract, Validator};

/// Callbacks invoked on defined ledger and protocol transitions.
///
/// Every method has an empty default so observers only implement what they
/// care about.
pub trait LedgerObserver: Send + Sync {
    /// A block was appended; `elapsed` covers the checks and the append.
    fn block_appended(&self, _block: &Block, _elapsed: Duration) {}

    /// `add_block` refused a block.
    fn block_rejected(&self, _block: &Block, _error: &ConsensusError) {}

    /// A validator was newly inserted into the registry.
    fn validator_admitted(&self, _validator: &Validator) {}

    /// A validator this node asked for admission turned the request down.
    fn admission_rejected(&self, _approver: &Address) {}

    /// The local chain was replaced by a peer's snapshot.
    fn sync_completed(&self, _from: &Address, _height: u64) {}

    /// A validated contract block naming this node as a party was appended.
    fn contract_completed(&self, _contract: &Contract) {}

    /// An unvalidated contract block naming this node as consumer could not
    /// be parsed.
    fn contract_request_invalid(&self, _contract_id: Option<&str>) {}
}

/// Observer that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl LedgerObserver for NoopObserver {}
