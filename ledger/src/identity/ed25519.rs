//! Ed25519 implementation of the identity capabilities.
//!
//! Addresses are the lower-hex encoding of the 32-byte verifying key, so a
//! verifier can reconstruct the key from nothing but the address carried in
//! a block or validator record.

use std::fmt;

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH,
    SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;

use super::{Identity, SignatureVerifier};
use crate::types::{Address, Hash256, Signature};

/// Errors raised while loading key material.
#[derive(Debug)]
pub enum IdentityError {
    /// Secret key was not valid hex.
    InvalidHex,
    /// Secret key had the wrong number of bytes.
    InvalidLength(usize),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::InvalidHex => write!(f, "secret key is not valid hex"),
            IdentityError::InvalidLength(n) => {
                write!(f, "secret key has {n} bytes, expected {SECRET_KEY_LENGTH}")
            }
        }
    }
}

impl std::error::Error for IdentityError {}

/// Stateless ed25519 signature verifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn verifying_key(address: &Address) -> Option<VerifyingKey> {
        let bytes = hex::decode(address.as_str()).ok()?;
        let arr: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&arr).ok()
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, public_key: &Address, signature: &Signature, hash: &Hash256) -> bool {
        let Some(key) = Self::verifying_key(public_key) else {
            return false;
        };
        let Ok(sig) = DalekSignature::from_slice(signature.as_bytes()) else {
            return false;
        };
        key.verify(hash.as_bytes(), &sig).is_ok()
    }
}

/// Keypair-backed node identity.
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Builds a wallet from raw secret key bytes.
    pub fn from_secret_bytes(secret: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&secret))
    }

    /// Builds a wallet from a hex-encoded 32-byte secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| IdentityError::InvalidHex)?;
        let len = bytes.len();
        let arr: [u8; SECRET_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(len))?;
        Ok(Self::from_secret_bytes(arr))
    }

    /// Hex encoding of the secret key, for the external key persistence.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address(hex::encode(signing_key.verifying_key().to_bytes()));
        Self {
            signing_key,
            address,
        }
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier for Wallet {
    fn verify(&self, public_key: &Address, signature: &Signature, hash: &Hash256) -> bool {
        Ed25519Verifier.verify(public_key, signature, hash)
    }
}

impl Identity for Wallet {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn sign(&self, hash: &Hash256) -> Signature {
        Signature(self.signing_key.sign(hash.as_bytes()).to_bytes().to_vec())
    }
}
