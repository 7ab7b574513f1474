//! Block validity predicates used by the ledger engine.

use crate::types::Block;

use super::chain::Chain;
use super::error::ValidationError;

/// Point in a block's lifecycle at which the predicate runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// A validator is about to countersign: `block.validator` names the
    /// prospective validator and no validator signature exists yet.
    Countersigning,
    /// The block is fully signed and about to be appended.
    Admission,
}

/// Pluggable validity predicate for blocks.
///
/// Implementations must be deterministic and side-effect free. They read
/// the current chain (registry and recent blocks) but never mutate it.
pub trait BlockValidator: Send + Sync {
    fn validate(&self, chain: &Chain, block: &Block, stage: Stage) -> Result<(), ValidationError>;
}

/// A trivial validator that accepts every block.
///
/// Useful for isolating linkage rules in tests.
pub struct AcceptAllValidator;

impl BlockValidator for AcceptAllValidator {
    fn validate(&self, _chain: &Chain, _block: &Block, _stage: Stage) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A validator that composes two other validators.
///
/// `CombinedValidator { first, second }` runs `first.validate` and then
/// `second.validate`, failing fast on the first error, so check order is
/// the composition order.
pub struct CombinedValidator<A, B> {
    pub first: A,
    pub second: B,
}

impl<A, B> CombinedValidator<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B> BlockValidator for CombinedValidator<A, B>
where
    A: BlockValidator,
    B: BlockValidator,
{
    fn validate(&self, chain: &Chain, block: &Block, stage: Stage) -> Result<(), ValidationError> {
        self.first.validate(chain, block, stage)?;
        self.second.validate(chain, block, stage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Validator};

    struct Reject(&'static str);

    impl BlockValidator for Reject {
        fn validate(&self, _: &Chain, _: &Block, _: Stage) -> Result<(), ValidationError> {
            Err(ValidationError::MissingSignature(self.0))
        }
    }

    fn chain() -> Chain {
        Chain::genesis(Validator::genesis(Address::from("v0"), 10.0, 20.0, 1.0))
    }

    #[test]
    fn combined_validator_fails_fast_in_order() {
        let v = CombinedValidator::new(Reject("first"), Reject("second"));
        let err = v
            .validate(&chain(), &Block::genesis(), Stage::Admission)
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingSignature("first"));
    }

    #[test]
    fn combined_validator_accepts_when_both_accept() {
        let v = CombinedValidator::new(AcceptAllValidator, AcceptAllValidator);
        assert!(v.validate(&chain(), &Block::genesis(), Stage::Admission).is_ok());
    }

    #[test]
    fn block_validator_trait_is_object_safe() {
        let v: Box<dyn BlockValidator> = Box::new(AcceptAllValidator);
        assert!(v.validate(&chain(), &Block::genesis(), Stage::Countersigning).is_ok());
    }
}
