//! Core domain types used by the ledger.
//!
//! This module defines strongly-typed hashes, peer addresses and signature
//! bytes shared across the ledger, together with the canonical hasher that
//! every signed record goes through. The goal is to avoid "naked" strings
//! and byte buffers in public APIs and instead use domain-specific newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Block, header and body types plus the block factory.
pub mod block;
/// Validator registry entries.
pub mod validator;

pub use block::{Block, BlockBody, BlockBuildError, BlockHeader, Contract, Reputation};
pub use validator::Validator;

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Version string stamped into every block header.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Strongly-typed 256-bit hash wrapper (BLAKE3-256).
///
/// Used for block hashes, body hashes, contract signing hashes and
/// validator hashes. It is always exactly [`HASH_LEN`] bytes long.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// The all-zero hash. Used as the genesis parent and as the blank
    /// value of a record's own hash field while it is being hashed.
    pub const ZERO: Hash256 = Hash256([0u8; HASH_LEN]);

    /// Computes a new [`Hash256`] as the BLAKE3-256 hash of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let h = blake3::hash(data);
        Hash256(*h.as_bytes())
    }

    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Peer address: the hex encoding of a node's ed25519 verifying key.
///
/// Addresses double as public keys: every signature on the ledger is
/// checked against the address of the party that is expected to have
/// produced it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    /// Sentinel creator/approver of the genesis block and validator.
    pub const GENESIS: &'static str = "genesis";

    pub fn new(s: impl Into<String>) -> Self {
        Address(s.into())
    }

    pub fn genesis() -> Self {
        Address(Self::GENESIS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// Detached ed25519 signature bytes over a [`Hash256`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Returns the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Returns the canonical byte representation of a record.
///
/// This uses **bincode 2** with the `standard()` configuration and the
/// `serde` integration, so the encoding follows field declaration order.
/// All hashing that must agree across nodes goes through this function.
///
/// # Panics
///
/// Panics if encoding fails. This is considered a programming error,
/// because every ledger record is plain serializable data.
pub fn canonical_bytes<T: Serialize>(record: &T) -> Vec<u8> {
    let cfg = bincode::config::standard();
    bincode::serde::encode_to_vec(record, cfg)
        .expect("ledger records should always be serializable with bincode 2 + serde")
}

/// Deterministic hash of a structured record.
///
/// Callers blank the record's own hash and signature fields before calling
/// this, so the digest only covers fields that are fixed once the record's
/// identity is fixed.
pub fn canonical_hash<T: Serialize>(record: &T) -> Hash256 {
    Hash256::compute(&canonical_bytes(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        a: u64,
        b: String,
    }

    #[test]
    fn canonical_hash_is_stable() {
        let s = Sample {
            a: 7,
            b: "x".to_string(),
        };
        assert_eq!(canonical_hash(&s), canonical_hash(&s));
    }

    #[test]
    fn canonical_hash_depends_on_every_field() {
        let base = canonical_hash(&Sample {
            a: 7,
            b: "x".to_string(),
        });
        let changed_a = canonical_hash(&Sample {
            a: 8,
            b: "x".to_string(),
        });
        let changed_b = canonical_hash(&Sample {
            a: 7,
            b: "y".to_string(),
        });
        assert_ne!(base, changed_a);
        assert_ne!(base, changed_b);
    }

    #[test]
    fn hash_displays_as_lower_hex() {
        let h = Hash256([0xab; HASH_LEN]);
        assert_eq!(h.to_string(), "ab".repeat(HASH_LEN));
        assert!(Hash256::ZERO.is_zero());
        assert!(!h.is_zero());
    }
}
