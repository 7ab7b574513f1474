//! Signing identity of a node.
//!
//! The core consumes cryptography through two small capabilities:
//!
//! - [`SignatureVerifier`]: checks a `(public key, signature, hash)` triple,
//! - [`Identity`]: a keypair-backed signer that also knows its own address.
//!
//! Validation code only needs the first; block factories and the protocol
//! layer need the second.

pub mod ed25519;

pub use ed25519::{Ed25519Verifier, IdentityError, Wallet};

use crate::types::{Address, Hash256, Signature};

/// Verifies detached signatures over ledger hashes.
///
/// Implementations must never panic on malformed input: an address that is
/// not a valid public key, or signature bytes of the wrong length, simply
/// fail verification.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public_key: &Address, signature: &Signature, hash: &Hash256) -> bool;
}

/// A node's signing identity.
pub trait Identity: SignatureVerifier {
    /// Address (public key) that signatures produced by this identity
    /// verify against.
    fn address(&self) -> Address;

    /// Signs a ledger hash.
    fn sign(&self, hash: &Hash256) -> Signature;
}
