//! Registry and signature checks of the block validity predicate.
//!
//! In order, with the first failure winning:
//!
//! 1. the countersigning validator is registered,
//! 2. its reputation is positive,
//! 3. the creator signed the block hash,
//! 4. the validator signed the block hash (skipped while countersigning),
//! 5. for contract bodies, both consumer and producer signed the contract.

use crate::consensus::chain::Chain;
use crate::consensus::error::ValidationError;
use crate::consensus::validator::{BlockValidator, Stage};
use crate::identity::SignatureVerifier;
use crate::types::{Address, Block, BlockBody, Hash256, Signature};

#[derive(Clone, Debug, Default)]
pub struct SignatureValidity<S> {
    verifier: S,
}

impl<S: SignatureVerifier> SignatureValidity<S> {
    pub fn new(verifier: S) -> Self {
        Self { verifier }
    }

    fn check_signature(
        &self,
        role: &'static str,
        signer: &Address,
        signature: Option<&Signature>,
        hash: &Hash256,
    ) -> Result<(), ValidationError> {
        let signature = signature.ok_or(ValidationError::MissingSignature(role))?;
        if !self.verifier.verify(signer, signature, hash) {
            return Err(ValidationError::BadSignature(role));
        }
        Ok(())
    }
}

impl<S: SignatureVerifier> BlockValidator for SignatureValidity<S> {
    fn validate(&self, chain: &Chain, block: &Block, stage: Stage) -> Result<(), ValidationError> {
        let address = block
            .validator
            .as_ref()
            .ok_or(ValidationError::MissingValidator)?;
        let validator = chain
            .validator(address)
            .ok_or_else(|| ValidationError::UnknownValidator(address.clone()))?;

        if !validator.is_active() {
            return Err(ValidationError::InactiveValidator(address.clone()));
        }

        self.check_signature("creator", &block.creator, block.creator_sign.as_ref(), &block.hash)?;

        if stage == Stage::Admission {
            self.check_signature("validator", address, block.validator_sign.as_ref(), &block.hash)?;
        }

        if let BlockBody::Contract(contract) = &block.body {
            let contract_hash = contract.signing_hash();
            self.check_signature(
                "consumer",
                &contract.consumer,
                contract.consumer_sign.as_ref(),
                &contract_hash,
            )?;
            self.check_signature(
                "producer",
                &contract.producer,
                contract.producer_sign.as_ref(),
                &contract_hash,
            )?;
        }

        Ok(())
    }
}
