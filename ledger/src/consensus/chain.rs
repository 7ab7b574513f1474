//! Ledger state: the ordered block sequence, the validator registry and the
//! height counter.
//!
//! `Chain` is plain data. It is what gets persisted, what a SYNC_RESPONSE
//! carries, and what validity predicates read. All mutation goes through
//! [`crate::consensus::LedgerEngine`].

use serde::{Deserialize, Serialize};

use crate::types::{Address, Block, Contract, Validator};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// Append-only block sequence, genesis first.
    pub blocks: Vec<Block>,
    /// Validator registry; addresses are unique.
    pub validators: Vec<Validator>,
    /// Index of the last block.
    pub height: u64,
}

impl Chain {
    /// Fresh chain: the genesis block and exactly one bootstrap validator.
    pub fn genesis(bootstrap: Validator) -> Self {
        Self {
            blocks: vec![Block::genesis()],
            validators: vec![bootstrap],
            height: 0,
        }
    }

    /// Rebuilds a chain from persisted records. The height mirrors the last
    /// block's index.
    pub fn from_parts(blocks: Vec<Block>, validators: Vec<Validator>) -> Self {
        let height = blocks.last().map(|b| b.index).unwrap_or(0);
        Self {
            blocks,
            validators,
            height,
        }
    }

    /// Last block of the chain.
    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn validator(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| &v.address == address)
    }

    pub fn is_validator(&self, address: &Address) -> bool {
        self.validator(address).is_some()
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    /// The last `n` blocks, newest first.
    pub fn recent_blocks(&self, n: usize) -> impl Iterator<Item = &Block> {
        self.blocks.iter().rev().take(n)
    }

    /// Contract block carrying the contract with this id, if any.
    pub fn find_contract(&self, id: &str) -> Option<(&Block, &Contract)> {
        self.blocks
            .iter()
            .find_map(|b| b.contract().filter(|c| c.id == id).map(|c| (b, c)))
    }

    /// Whether a reputation block already settles the contract `id`.
    pub fn is_settled(&self, id: &str) -> bool {
        self.blocks
            .iter()
            .skip(1)
            .filter_map(|b| b.reputation())
            .any(|r| r.related_contract_id == id)
    }

    /// Sum of signed reputation changes recorded against `peer`.
    ///
    /// This is a derived view for collaborators; it never feeds back into
    /// the registry or the validity predicate.
    pub fn reputation_delta(&self, peer: &Address) -> f64 {
        self.blocks
            .iter()
            .skip(1)
            .filter_map(|b| b.reputation())
            .filter(|r| &r.peer == peer)
            .map(|r| r.signed_change())
            .sum()
    }
}
