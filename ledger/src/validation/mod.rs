//! Block validity predicates for the ledger.
//!
//! This module implements concrete block validators that plug into the
//! ledger engine via [`crate::consensus::validator::BlockValidator`].
//!
//! It currently provides:
//!
//! - [`base::SignatureValidity`]: registry lookup, reputation and all
//!   signature checks (checks 1-5).
//! - [`rotation::RotationValidity`]: the anti-concentration rule (check 6).

pub mod base;
pub mod rotation;

pub use base::SignatureValidity;
pub use rotation::RotationValidity;
