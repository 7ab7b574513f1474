use std::fmt;

use crate::types::{Address, Hash256};

/// Error type returned when a block fails the validity predicate.
///
/// Variants follow the order in which the predicate runs its checks.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Block names no countersigning validator.
    MissingValidator,
    /// Countersigning validator is not in the registry.
    UnknownValidator(Address),
    /// Countersigning validator has no positive reputation.
    InactiveValidator(Address),
    /// A signature required by the given role is absent.
    MissingSignature(&'static str),
    /// A signature by the given role does not verify.
    BadSignature(&'static str),
    /// Validator countersigned one of the last `window` blocks.
    ValidatorTooRecent { validator: Address, window: usize },
    /// Validator record's hash does not match its content.
    ValidatorHashMismatch(Address),
}

/// Errors raised when a block does not fit onto the current tip.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralError {
    /// Block index is not beyond the current height.
    IndexNotIncreasing { height: u64, index: u64 },
    /// Block index skips over missing blocks.
    IndexGap { height: u64, index: u64 },
    /// `prev_block_hash` does not match the current tip.
    ParentMismatch { expected: Hash256, found: Hash256 },
    /// Stored hash does not match the block content.
    HashMismatch,
}

/// High-level errors that can occur in the ledger engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusError {
    /// Block does not attach to the tip; recover by syncing.
    Structural(StructuralError),
    /// Block failed the validity predicate and is dropped.
    Validation(ValidationError),
}

impl From<ValidationError> for ConsensusError {
    fn from(e: ValidationError) -> Self {
        ConsensusError::Validation(e)
    }
}

impl From<StructuralError> for ConsensusError {
    fn from(e: StructuralError) -> Self {
        ConsensusError::Structural(e)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingValidator => write!(f, "invalid block: no validator"),
            ValidationError::UnknownValidator(a) => {
                write!(f, "invalid block: validator {a} not registered")
            }
            ValidationError::InactiveValidator(a) => {
                write!(f, "invalid block: validator {a} has no positive reputation")
            }
            ValidationError::MissingSignature(role) => {
                write!(f, "invalid block: missing {role} signature")
            }
            ValidationError::BadSignature(role) => {
                write!(f, "invalid block: bad {role} signature")
            }
            ValidationError::ValidatorTooRecent { validator, window } => write!(
                f,
                "invalid block: validator {validator} countersigned within the last {window} blocks"
            ),
            ValidationError::ValidatorHashMismatch(a) => {
                write!(f, "invalid validator {a}: hash does not match record")
            }
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::IndexNotIncreasing { height, index } => {
                write!(f, "block index {index} does not exceed height {height}")
            }
            StructuralError::IndexGap { height, index } => {
                write!(f, "block index {index} skips ahead of height {height}")
            }
            StructuralError::ParentMismatch { expected, found } => {
                write!(f, "prev block hash {found} does not match tip {expected}")
            }
            StructuralError::HashMismatch => write!(f, "block hash does not match its content"),
        }
    }
}

impl fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::Structural(e) => write!(f, "structural error: {e}"),
            ConsensusError::Validation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ValidationError {}
impl std::error::Error for StructuralError {}
impl std::error::Error for ConsensusError {}
