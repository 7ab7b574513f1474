// ledger/src/types/block.rs

//! Block types, canonical block hashing and the block factory.
//!
//! A block links to its parent through `header.prev_block_hash` and carries
//! exactly one body: either an energy [`Contract`] between two prosumers or
//! a [`Reputation`] change derived from a settled contract.
//!
//! The block hash covers everything except the fields that are filled in
//! after the block's identity is fixed: the hash itself, the creator's
//! signature and the validator countersignature.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{Address, Hash256, PROTOCOL_VERSION, Signature, canonical_hash};
use crate::identity::Identity;

/// Block header: linking and versioning fields. Immutable once set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block.
    pub prev_block_hash: Hash256,
    /// Canonical hash of the block body.
    pub body_hash: Hash256,
    /// Creation time, milliseconds since Unix epoch, as a decimal string.
    pub created: String,
    /// Protocol version the block was created under.
    pub version: String,
}

impl BlockHeader {
    /// Builds a header for `body` on top of `prev_block_hash`, stamped with
    /// the current wall-clock time.
    pub fn new(prev_block_hash: Hash256, body: &BlockBody) -> Self {
        Self {
            prev_block_hash,
            body_hash: body.compute_hash(),
            created: current_unix_millis().to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Energy contract between a producer (seller) and a consumer (buyer).
///
/// Both parties sign [`Contract::signing_hash`], i.e. the contract with
/// both signature fields blanked. The consumer signs when requesting, the
/// producer countersigns when accepting the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub producer: Address,
    pub consumer: Address,
    /// Unique contract identifier.
    pub id: String,
    /// Amount of energy traded.
    pub amount: f64,
    /// Price per unit the consumer is willing to pay.
    pub rate: f64,
    pub fulfilled: bool,
    pub producer_sign: Option<Signature>,
    pub consumer_sign: Option<Signature>,
}

impl Contract {
    /// Creates an unsigned, unfulfilled contract draft.
    pub fn draft(
        producer: Address,
        consumer: Address,
        id: impl Into<String>,
        amount: f64,
        rate: f64,
    ) -> Self {
        Self {
            producer,
            consumer,
            id: id.into(),
            amount,
            rate,
            fulfilled: false,
            producer_sign: None,
            consumer_sign: None,
        }
    }

    /// Hash both parties sign: the contract with its signatures blanked.
    pub fn signing_hash(&self) -> Hash256 {
        let mut blank = self.clone();
        blank.producer_sign = None;
        blank.consumer_sign = None;
        canonical_hash(&blank)
    }
}

/// Reputation change recorded against a peer after a contract settles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    /// Magnitude of the change.
    pub change: f64,
    /// Peer whose reputation changes.
    pub peer: Address,
    /// Contract the change was derived from.
    pub related_contract_id: String,
    /// Whether the change counts against the peer.
    pub is_negative: bool,
}

impl Reputation {
    /// Signed value of the change.
    pub fn signed_change(&self) -> f64 {
        if self.is_negative {
            -self.change
        } else {
            self.change
        }
    }
}

/// Block body: exactly one of a contract or a reputation change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BlockBody {
    Contract(Contract),
    Reputation(Reputation),
}

impl BlockBody {
    pub fn compute_hash(&self) -> Hash256 {
        canonical_hash(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BlockBody::Contract(_) => "contract",
            BlockBody::Reputation(_) => "reputation",
        }
    }
}

/// Error returned by the block factory.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockBuildError {
    /// A reputation block can only be derived from a contract block.
    NotAContract { index: u64 },
    /// The parent already sits at the largest representable index.
    IndexOverflow { parent: u64 },
}

impl fmt::Display for BlockBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockBuildError::NotAContract { index } => {
                write!(f, "block #{index} does not carry a contract body")
            }
            BlockBuildError::IndexOverflow { parent } => {
                write!(f, "no block index follows #{parent}")
            }
        }
    }
}

impl std::error::Error for BlockBuildError {}

/// A ledger block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
    /// Position in the chain; genesis is 0.
    pub index: u64,
    /// Node that created (and signed) the block.
    pub creator: Address,
    pub creator_sign: Option<Signature>,
    /// Hash over the block with `hash`, `creator_sign`, `validator` and
    /// `validator_sign` blanked.
    pub hash: Hash256,
    /// Countersigning validator, empty until validated.
    pub validator: Option<Address>,
    pub validator_sign: Option<Signature>,
}

impl Block {
    /// The fixed genesis block every chain starts from.
    ///
    /// It carries a zero reputation change against the genesis sentinel and
    /// has no signatures; it is never run through the validity predicate.
    pub fn genesis() -> Self {
        let body = BlockBody::Reputation(Reputation {
            change: 0.0,
            peer: Address::genesis(),
            related_contract_id: Address::GENESIS.to_string(),
            is_negative: false,
        });
        let header = BlockHeader {
            prev_block_hash: Hash256::ZERO,
            body_hash: body.compute_hash(),
            created: "0".to_string(),
            version: PROTOCOL_VERSION.to_string(),
        };
        let mut block = Block {
            header,
            body,
            index: 0,
            creator: Address::genesis(),
            creator_sign: None,
            hash: Hash256::ZERO,
            validator: None,
            validator_sign: None,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Builds and signs a contract block on top of `prev`.
    ///
    /// The validator fields stay empty until a qualifying validator
    /// countersigns the block.
    pub fn create_contract_block(
        prev: &Block,
        contract: Contract,
        signer: &dyn Identity,
    ) -> Result<Self, BlockBuildError> {
        let mut block = Self::unsealed(prev, BlockBody::Contract(contract))?;
        block.seal(signer);
        Ok(block)
    }

    /// Derives an unsealed reputation block from a contract block.
    ///
    /// The reputation change is the contract amount, charged against the
    /// producer, and is negative when the contract was not fulfilled.
    /// Callers seal the result with [`Block::seal`] before broadcasting it.
    pub fn create_reputation_block(prev: &Block, related: &Block) -> Result<Self, BlockBuildError> {
        let BlockBody::Contract(contract) = &related.body else {
            return Err(BlockBuildError::NotAContract {
                index: related.index,
            });
        };
        let body = BlockBody::Reputation(Reputation {
            change: contract.amount,
            peer: contract.producer.clone(),
            related_contract_id: contract.id.clone(),
            is_negative: !contract.fulfilled,
        });
        Self::unsealed(prev, body)
    }

    fn unsealed(prev: &Block, body: BlockBody) -> Result<Self, BlockBuildError> {
        let index = prev
            .index
            .checked_add(1)
            .ok_or(BlockBuildError::IndexOverflow { parent: prev.index })?;
        Ok(Block {
            header: BlockHeader::new(prev.hash, &body),
            body,
            index,
            creator: Address::default(),
            creator_sign: None,
            hash: Hash256::ZERO,
            validator: None,
            validator_sign: None,
        })
    }

    /// Sets `signer` as creator, recomputes the hash and signs it.
    pub fn seal(&mut self, signer: &dyn Identity) {
        self.creator = signer.address();
        self.hash = self.compute_hash();
        self.creator_sign = Some(signer.sign(&self.hash));
    }

    /// Computes the canonical hash of this block with its mutable fields
    /// blanked. Stable under repeated computation and independent of the
    /// current `hash`, signatures and validator.
    pub fn compute_hash(&self) -> Hash256 {
        let mut blank = self.clone();
        blank.hash = Hash256::ZERO;
        blank.creator_sign = None;
        blank.validator = None;
        blank.validator_sign = None;
        canonical_hash(&blank)
    }

    /// Returns `true` if the stored hash matches the recomputed one and the
    /// header commits to the body.
    pub fn is_hash_consistent(&self) -> bool {
        self.hash == self.compute_hash() && self.header.body_hash == self.body.compute_hash()
    }

    pub fn contract(&self) -> Option<&Contract> {
        match &self.body {
            BlockBody::Contract(c) => Some(c),
            BlockBody::Reputation(_) => None,
        }
    }

    pub fn reputation(&self) -> Option<&Reputation> {
        match &self.body {
            BlockBody::Reputation(r) => Some(r),
            BlockBody::Contract(_) => None,
        }
    }
}

/// Returns the current wall-clock time as milliseconds since Unix epoch.
///
/// On error (system clock before epoch) this falls back to 0.
fn current_unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
