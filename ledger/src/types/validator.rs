//! Validator registry entries.
//!
//! A validator is an identity admitted by an existing validator and allowed
//! to countersign blocks. Its hash covers every field except the admitting
//! signature and the hash itself, and the admitting validator signs that
//! hash.

use serde::{Deserialize, Serialize};

use super::{Address, Hash256, Signature, canonical_hash};
use crate::identity::Identity;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Identity-derived address of the validator.
    pub address: Address,
    /// Address of the admitting validator.
    pub approved_by: Address,
    pub approved_by_sign: Option<Signature>,
    /// Reputation assigned at admission time.
    pub reputation: f64,
    /// Energy the validator can supply per contract (exclusive bound).
    pub energy_capacity: f64,
    /// Lowest rate the validator sells at.
    pub energy_rate: f64,
    pub hash: Hash256,
}

impl Validator {
    /// Bootstrap validator seeded into a fresh chain.
    ///
    /// Approved by the genesis sentinel and unsigned; it is inserted
    /// directly and never goes through admission checks.
    pub fn genesis(address: Address, reputation: f64, energy_capacity: f64, energy_rate: f64) -> Self {
        let mut v = Self {
            address,
            approved_by: Address::genesis(),
            approved_by_sign: None,
            reputation,
            energy_capacity,
            energy_rate,
            hash: Hash256::ZERO,
        };
        v.hash = v.compute_hash();
        v
    }

    /// Mints a validator admitted by `approver` and signs it.
    pub fn admit(
        address: Address,
        approver: &dyn Identity,
        reputation: f64,
        energy_capacity: f64,
        energy_rate: f64,
    ) -> Self {
        let mut v = Self {
            address,
            approved_by: approver.address(),
            approved_by_sign: None,
            reputation,
            energy_capacity,
            energy_rate,
            hash: Hash256::ZERO,
        };
        v.hash = v.compute_hash();
        v.approved_by_sign = Some(approver.sign(&v.hash));
        v
    }

    /// Hash with `approved_by_sign` and `hash` blanked.
    pub fn compute_hash(&self) -> Hash256 {
        let mut blank = self.clone();
        blank.approved_by_sign = None;
        blank.hash = Hash256::ZERO;
        canonical_hash(&blank)
    }

    /// A validator may countersign blocks only while its reputation is
    /// strictly positive.
    pub fn is_active(&self) -> bool {
        self.reputation > 0.0
    }
}
