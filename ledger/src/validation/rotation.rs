//! Anti-concentration rule.
//!
//! A validator may not countersign a block if it countersigned any of the
//! last `min(height, floor(N/2) + 1)` blocks, where `N` is the size of the
//! validator registry. This bounds how often a single validator can extend
//! the chain relative to the size of the validator set.

use crate::consensus::chain::Chain;
use crate::consensus::error::ValidationError;
use crate::consensus::validator::{BlockValidator, Stage};
use crate::types::Block;

#[derive(Clone, Copy, Debug, Default)]
pub struct RotationValidity;

impl RotationValidity {
    /// Number of trailing blocks a validator must be absent from.
    pub fn window(chain: &Chain) -> usize {
        let w = chain.validator_count() / 2 + 1;
        let height = usize::try_from(chain.height).unwrap_or(usize::MAX);
        w.min(height)
    }
}

impl BlockValidator for RotationValidity {
    fn validate(&self, chain: &Chain, block: &Block, _stage: Stage) -> Result<(), ValidationError> {
        let Some(validator) = block.validator.as_ref() else {
            return Err(ValidationError::MissingValidator);
        };

        let window = Self::window(chain);
        let reused = chain
            .recent_blocks(window)
            .any(|b| b.validator.as_ref() == Some(validator));

        if reused {
            return Err(ValidationError::ValidatorTooRecent {
                validator: validator.clone(),
                window,
            });
        }
        Ok(())
    }
}
