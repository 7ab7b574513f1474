//! Shared fixtures for unit tests.

use crate::consensus::chain::Chain;
use crate::identity::{Identity, Wallet};
use crate::types::{Block, Contract, Validator};

pub fn wallet(seed: u8) -> Wallet {
    Wallet::from_secret_bytes([seed; 32])
}

/// Chain whose registry holds the given validators. The first one is the
/// genesis validator, the rest are admitted by it.
pub fn chain_with(validators: &[(&Wallet, f64)]) -> Chain {
    let (first, first_rep) = validators[0];
    let mut chain = Chain::genesis(Validator::genesis(first.address(), first_rep, 20.0, 1.0));
    for (w, rep) in &validators[1..] {
        chain
            .validators
            .push(Validator::admit(w.address(), first, *rep, 20.0, 1.0));
    }
    chain
}

pub fn signed_contract(producer: &Wallet, consumer: &Wallet, id: &str, amount: f64, rate: f64) -> Contract {
    let mut c = Contract::draft(producer.address(), consumer.address(), id, amount, rate);
    let h = c.signing_hash();
    c.consumer_sign = Some(consumer.sign(&h));
    c.producer_sign = Some(producer.sign(&h));
    c
}

/// Unvalidated contract block on top of the chain tip.
pub fn contract_block(chain: &Chain, producer: &Wallet, consumer: &Wallet, id: &str) -> Block {
    let tip = chain.tip().expect("chain has a tip");
    Block::create_contract_block(tip, signed_contract(producer, consumer, id, 5.0, 2.0), producer)
        .expect("tip index leaves room")
}

/// Unvalidated reputation block on top of the chain tip, sealed by `creator`.
pub fn reputation_block(chain: &Chain, creator: &Wallet) -> Block {
    let tip = chain.tip().expect("chain has a tip");
    let source = Block::create_contract_block(
        tip,
        signed_contract(creator, creator, "rep-source", 1.0, 1.0),
        creator,
    )
    .expect("tip index leaves room");
    let mut block = Block::create_reputation_block(tip, &source).expect("contract source");
    block.seal(creator);
    block
}

pub fn countersign(mut block: Block, validator: &Wallet) -> Block {
    block.validator = Some(validator.address());
    block.validator_sign = Some(validator.sign(&block.hash));
    block
}
