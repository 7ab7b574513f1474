//! Ledger engine: the only place ledger state is mutated.
//!
//! The engine wires together:
//!
//! - the [`Chain`] (blocks, validator registry, height),
//! - a [`BlockValidator`] implementing the validity predicate, and
//! - a [`SignatureVerifier`] for validator admission.
//!
//! It exposes the validity predicate, countersigning for nodes acting as
//! validators, block append, validator admission and full-state
//! replacement. Persistence and propagation are the caller's job.

use tracing::{debug, warn};

use crate::identity::{Identity, SignatureVerifier};
use crate::types::{Block, Validator};

use super::chain::Chain;
use super::error::{ConsensusError, StructuralError, ValidationError};
use super::validator::{BlockValidator, Stage};

/// Outcome of [`LedgerEngine::add_validator`] for a correctly signed record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Added,
    AlreadyPresent,
}

/// Fully-configurable ledger engine.
///
/// This struct is generic over:
///
/// - `V`: block validator implementing [`BlockValidator`],
/// - `S`: signature verifier used to check validator admissions.
pub struct LedgerEngine<V, S> {
    chain: Chain,
    validator: V,
    verifier: S,
}

impl<V, S> LedgerEngine<V, S>
where
    V: BlockValidator,
    S: SignatureVerifier,
{
    /// Creates an engine over an existing chain (fresh genesis or loaded
    /// from the durable store).
    pub fn new(chain: Chain, validator: V, verifier: S) -> Self {
        Self {
            chain,
            validator,
            verifier,
        }
    }

    /// Read access to the current ledger state.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn height(&self) -> u64 {
        self.chain.height
    }

    /// Runs the full validity predicate and reports the first failing check.
    pub fn check_block(&self, block: &Block) -> Result<(), ValidationError> {
        self.validator.validate(&self.chain, block, Stage::Admission)
    }

    /// Full validity predicate. Performs no mutation.
    pub fn is_block_valid(&self, block: &Block) -> bool {
        self.check_block(block).is_ok()
    }

    /// Countersigns `block` as `signer` if `signer` may validate it.
    ///
    /// Runs the predicate with `signer` as the prospective validator and
    /// without the validator-signature check, then stamps the validator
    /// address and signature. Returns `None` on any failing check.
    pub fn validate_block(&self, signer: &dyn Identity, block: &Block) -> Option<Block> {
        let mut candidate = block.clone();
        candidate.validator = Some(signer.address());
        candidate.validator_sign = None;

        if let Err(e) = self
            .validator
            .validate(&self.chain, &candidate, Stage::Countersigning)
        {
            debug!(index = block.index, error = %e, "refusing to countersign block");
            return None;
        }

        candidate.validator_sign = Some(signer.sign(&candidate.hash));
        Some(candidate)
    }

    /// Appends a block on top of the current tip.
    ///
    /// Structural checks (index, parent link, hash integrity) run first and
    /// reject without touching the predicate; then the validity predicate
    /// decides. Nothing is mutated unless the block is appended.
    pub fn add_block(&mut self, block: Block) -> Result<(), ConsensusError> {
        let height = self.chain.height;

        if height >= block.index {
            return Err(StructuralError::IndexNotIncreasing {
                height,
                index: block.index,
            }
            .into());
        }
        if block.index != height + 1 {
            return Err(StructuralError::IndexGap {
                height,
                index: block.index,
            }
            .into());
        }

        let expected = self.chain.tip().map(|b| b.hash).unwrap_or_default();
        if block.header.prev_block_hash != expected {
            return Err(StructuralError::ParentMismatch {
                expected,
                found: block.header.prev_block_hash,
            }
            .into());
        }
        if !block.is_hash_consistent() {
            return Err(StructuralError::HashMismatch.into());
        }

        self.check_block(&block)?;

        self.chain.height = block.index;
        self.chain.blocks.push(block);
        Ok(())
    }

    /// Admits a validator whose record is signed by its approver.
    ///
    /// Re-adding an address that is already registered is a no-op.
    pub fn add_validator(&mut self, validator: Validator) -> Result<Admission, ValidationError> {
        if validator.hash != validator.compute_hash() {
            return Err(ValidationError::ValidatorHashMismatch(validator.address));
        }

        let signature = validator
            .approved_by_sign
            .as_ref()
            .ok_or(ValidationError::MissingSignature("approver"))?;
        if !self
            .verifier
            .verify(&validator.approved_by, signature, &validator.hash)
        {
            return Err(ValidationError::BadSignature("approver"));
        }

        if self.chain.is_validator(&validator.address) {
            return Ok(Admission::AlreadyPresent);
        }

        self.chain.validators.push(validator);
        Ok(Admission::Added)
    }

    /// Overwrites blocks, validators and height with a remote snapshot.
    ///
    /// The remote chain is adopted as-is: it is neither compared against
    /// the local chain nor re-validated.
    pub fn replace_chain(&mut self, remote: Chain) {
        if remote.height < self.chain.height {
            warn!(
                local = self.chain.height,
                remote = remote.height,
                "replacing chain with a shorter remote chain"
            );
        }
        self.chain = remote;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::validator::{AcceptAllValidator, CombinedValidator};
    use crate::identity::{Ed25519Verifier, Wallet};
    use crate::testutil::{chain_with, contract_block, countersign, reputation_block, wallet};
    use crate::types::Hash256;
    use crate::validation::{RotationValidity, SignatureValidity};

    type TestEngine =
        LedgerEngine<CombinedValidator<SignatureValidity<Ed25519Verifier>, RotationValidity>, Ed25519Verifier>;

    fn engine(chain: Chain) -> TestEngine {
        LedgerEngine::new(
            chain,
            CombinedValidator::new(SignatureValidity::new(Ed25519Verifier), RotationValidity),
            Ed25519Verifier,
        )
    }

    fn next_reputation(engine: &TestEngine, creator: &Wallet, validator: &Wallet) -> Block {
        countersign(reputation_block(engine.chain(), creator), validator)
    }

    #[test]
    fn genesis_reputation_block_with_single_validator_is_appended() {
        let v0 = wallet(1);
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let genesis_hash = engine.chain().blocks[0].hash;

        let block = next_reputation(&engine, &v0, &v0);
        assert_eq!(block.index, 1);
        assert_eq!(block.header.prev_block_hash, genesis_hash);

        engine.add_block(block).expect("block #1 appends");
        assert_eq!(engine.height(), 1);
        assert_eq!(engine.chain().blocks.len(), 2);
    }

    #[test]
    fn appended_blocks_link_to_their_parent() {
        let (v0, v1, v2) = (wallet(1), wallet(2), wallet(3));
        let mut engine = engine(chain_with(&[(&v0, 10.0), (&v1, 1.0), (&v2, 1.0)]));

        for signer in [&v0, &v1, &v2, &v0] {
            let block = next_reputation(&engine, &v0, signer);
            engine.add_block(block).expect("rotating validators append");
        }

        let blocks = &engine.chain().blocks;
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].index, pair[0].index + 1);
            assert_eq!(pair[1].header.prev_block_hash, pair[0].hash);
        }
        assert_eq!(engine.height(), 4);
    }

    #[test]
    fn anti_concentration_with_two_validators() {
        let (v0, v1) = (wallet(1), wallet(2));
        let mut engine = engine(chain_with(&[(&v0, 10.0), (&v1, 1.0)]));

        engine
            .add_block(next_reputation(&engine, &v0, &v0))
            .expect("block #1 by v0");

        let unsigned = reputation_block(engine.chain(), &v0);
        let again_v0 = countersign(unsigned.clone(), &v0);
        assert!(!engine.is_block_valid(&again_v0));
        assert!(matches!(
            engine.add_block(again_v0),
            Err(ConsensusError::Validation(ValidationError::ValidatorTooRecent { .. }))
        ));
        assert_eq!(engine.height(), 1);

        let by_v1 = countersign(unsigned, &v1);
        assert!(engine.is_block_valid(&by_v1));
        engine.add_block(by_v1).expect("block #2 by v1");
        assert_eq!(engine.height(), 2);
    }

    #[test]
    fn rejects_block_from_unregistered_validator() {
        let (v0, outsider) = (wallet(1), wallet(7));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let block = next_reputation(&engine, &v0, &outsider);

        assert!(!engine.is_block_valid(&block));
        assert_eq!(
            engine.add_block(block),
            Err(ConsensusError::Validation(ValidationError::UnknownValidator(
                outsider.address()
            )))
        );
        assert_eq!(engine.height(), 0);
    }

    #[test]
    fn rejects_non_increasing_index() {
        let v0 = wallet(1);
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let mut block = next_reputation(&engine, &v0, &v0);
        block.index = 0;

        assert_eq!(
            engine.add_block(block),
            Err(ConsensusError::Structural(StructuralError::IndexNotIncreasing {
                height: 0,
                index: 0
            }))
        );
    }

    #[test]
    fn rejects_index_gap() {
        let v0 = wallet(1);
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let mut block = next_reputation(&engine, &v0, &v0);
        block.index = 3;

        assert!(matches!(
            engine.add_block(block),
            Err(ConsensusError::Structural(StructuralError::IndexGap { .. }))
        ));
    }

    #[test]
    fn rejects_parent_mismatch() {
        let v0 = wallet(1);
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let mut block = reputation_block(engine.chain(), &v0);
        block.header.prev_block_hash = Hash256([7u8; 32]);
        block.seal(&v0);
        let block = countersign(block, &v0);

        assert!(matches!(
            engine.add_block(block),
            Err(ConsensusError::Structural(StructuralError::ParentMismatch { .. }))
        ));
        assert_eq!(engine.chain().blocks.len(), 1);
    }

    #[test]
    fn rejects_tampered_body() {
        let (v0, producer, consumer) = (wallet(1), wallet(2), wallet(3));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let mut block = countersign(contract_block(engine.chain(), &producer, &consumer, "c-1"), &v0);
        if let crate::types::BlockBody::Contract(c) = &mut block.body {
            c.amount = 1_000.0;
        }

        assert_eq!(
            engine.add_block(block),
            Err(ConsensusError::Structural(StructuralError::HashMismatch))
        );
    }

    #[test]
    fn validate_block_stamps_countersignature() {
        let (v0, producer, consumer) = (wallet(1), wallet(2), wallet(3));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let unvalidated = contract_block(engine.chain(), &producer, &consumer, "c-1");

        let stamped = engine
            .validate_block(&v0, &unvalidated)
            .expect("registered validator countersigns");
        assert_eq!(stamped.validator, Some(v0.address()));
        assert_eq!(stamped.hash, unvalidated.hash);
        assert!(engine.is_block_valid(&stamped));

        engine.add_block(stamped).expect("stamped block appends");
    }

    #[test]
    fn validate_block_refuses_outsider_and_recent_validator() {
        let (v0, outsider) = (wallet(1), wallet(9));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let block = reputation_block(engine.chain(), &v0);
        assert!(engine.validate_block(&outsider, &block).is_none());

        let stamped = engine.validate_block(&v0, &block).expect("v0 countersigns");
        engine.add_block(stamped).expect("appends");

        let next = reputation_block(engine.chain(), &v0);
        assert!(engine.validate_block(&v0, &next).is_none());
    }

    #[test]
    fn add_validator_is_idempotent() {
        let (v0, newcomer) = (wallet(1), wallet(2));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));
        let record = Validator::admit(newcomer.address(), &v0, 1.0, 10.0, 2.0);

        assert_eq!(engine.add_validator(record.clone()), Ok(Admission::Added));
        assert_eq!(engine.chain().validator_count(), 2);

        assert_eq!(engine.add_validator(record), Ok(Admission::AlreadyPresent));
        assert_eq!(engine.chain().validator_count(), 2);
    }

    #[test]
    fn add_validator_rejects_bad_approval() {
        let (v0, newcomer, forger) = (wallet(1), wallet(2), wallet(3));
        let mut engine = engine(chain_with(&[(&v0, 10.0)]));

        let mut forged = Validator::admit(newcomer.address(), &forger, 1.0, 10.0, 2.0);
        forged.approved_by = v0.address();
        forged.hash = forged.compute_hash();
        assert_eq!(
            engine.add_validator(forged),
            Err(ValidationError::BadSignature("approver"))
        );

        let mut inflated = Validator::admit(newcomer.address(), &v0, 1.0, 10.0, 2.0);
        inflated.reputation = 100.0;
        assert_eq!(
            engine.add_validator(inflated),
            Err(ValidationError::ValidatorHashMismatch(newcomer.address()))
        );
        assert_eq!(engine.chain().validator_count(), 1);
    }

    #[test]
    fn replace_chain_overwrites_everything() {
        let (v0, v1, v2) = (wallet(1), wallet(2), wallet(3));

        let mut remote = engine(chain_with(&[(&v0, 10.0), (&v1, 1.0), (&v2, 1.0)]));
        for signer in [&v0, &v1, &v2, &v0] {
            let block = next_reputation(&remote, &v0, signer);
            remote.add_block(block).expect("remote grows");
        }
        let snapshot = remote.chain().clone();
        assert_eq!(snapshot.blocks.len(), 5);

        let mut local = LedgerEngine::new(
            chain_with(&[(&wallet(4), 10.0)]),
            AcceptAllValidator,
            Ed25519Verifier,
        );
        local.replace_chain(snapshot.clone());

        assert_eq!(local.chain(), &snapshot);
        assert_eq!(local.height(), 4);
    }
}
