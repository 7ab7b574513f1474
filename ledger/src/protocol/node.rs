//! Node context and message handlers.
//!
//! A [`Node`] owns everything a peer needs to take part in the network:
//! its identity, the ledger engine and peer table (behind one lock), the
//! durable store, the admission oracle and an observer. Inbound envelopes
//! enter through [`Node::process`]; the collaborator-facing actions
//! (buy requests, admission requests, sync) are methods on the same type.
//!
//! Every handler takes the state lock for its whole critical section, so
//! no two messages (or a driver tick) interleave mutations of the chain.
//! State is persisted after each successful mutation and before the
//! mutation is broadcast further.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::consensus::{Admission, Chain, CombinedValidator, ConsensusError, LedgerEngine, ValidationError};
use crate::identity::{Ed25519Verifier, Identity};
use crate::network::peer::{Peer, PeerLink, PeerTable};
use crate::network::tcp::DEFAULT_MAX_FRAME_LENGTH;
use crate::storage::{LedgerStore, StorageError};
use crate::types::{Address, Block, BlockBody, BlockBuildError, Contract, Validator};
use crate::validation::{RotationValidity, SignatureValidity};
use crate::DefaultLedgerEngine;

use super::message::{AdmissionRequest, Envelope, FulfillmentReport, HandshakeInfo, MessageKind};
use super::observer::LedgerObserver;
use super::oracle::{AdmissionConfig, ApprovalOracle};

/// Errors surfaced by protocol handlers and collaborator actions.
#[derive(Debug)]
pub enum ProtocolError {
    /// Payload could not be decoded for its message kind.
    MalformedPayload {
        kind: MessageKind,
        source: serde_json::Error,
    },
    /// Outbound payload could not be encoded.
    Encode(serde_json::Error),
    /// The block body does not match the message kind.
    UnexpectedBody { kind: MessageKind, index: u64 },
    /// Envelope sender does not match the party named in the payload.
    SenderMismatch { from: Address, expected: Address },
    /// No usable link to this peer.
    UnknownPeer(Address),
    /// No connected validator to address a request to.
    NoValidatorAvailable,
    /// This node is already a registered validator.
    AlreadyValidator,
    /// No contract with this id on the local chain.
    UnknownContract(String),
    /// This node is not the consumer of the contract.
    NotConsumer(String),
    /// A validator record failed admission checks.
    InvalidValidator(ValidationError),
    Rejected(ConsensusError),
    BlockBuild(BlockBuildError),
    Storage(StorageError),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedPayload { kind, source } => {
                write!(f, "malformed {kind} payload: {source}")
            }
            ProtocolError::Encode(e) => write!(f, "failed to encode payload: {e}"),
            ProtocolError::UnexpectedBody { kind, index } => {
                write!(f, "block #{index} has the wrong body for {kind}")
            }
            ProtocolError::SenderMismatch { from, expected } => {
                write!(f, "sender {from} does not match {expected}")
            }
            ProtocolError::UnknownPeer(p) => write!(f, "no link to peer {p}"),
            ProtocolError::NoValidatorAvailable => f.write_str("no connected validator"),
            ProtocolError::AlreadyValidator => f.write_str("already a validator"),
            ProtocolError::UnknownContract(id) => write!(f, "unknown contract {id}"),
            ProtocolError::NotConsumer(id) => write!(f, "not the consumer of contract {id}"),
            ProtocolError::InvalidValidator(e) => write!(f, "invalid validator record: {e}"),
            ProtocolError::Rejected(e) => write!(f, "block rejected: {e}"),
            ProtocolError::BlockBuild(e) => write!(f, "block build error: {e}"),
            ProtocolError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ConsensusError> for ProtocolError {
    fn from(e: ConsensusError) -> Self {
        ProtocolError::Rejected(e)
    }
}

impl From<BlockBuildError> for ProtocolError {
    fn from(e: BlockBuildError) -> Self {
        ProtocolError::BlockBuild(e)
    }
}

impl From<StorageError> for ProtocolError {
    fn from(e: StorageError) -> Self {
        ProtocolError::Storage(e)
    }
}

/// Everything guarded by the node lock.
pub struct NodeState {
    pub engine: DefaultLedgerEngine,
    pub peers: PeerTable,
}

impl NodeState {
    /// Whether `address` is a registered validator with positive reputation.
    fn is_active_validator(&self, address: &Address) -> bool {
        self.engine
            .chain()
            .validator(address)
            .is_some_and(Validator::is_active)
    }
}

/// Network-facing settings of a node.
#[derive(Clone, Debug)]
pub struct NodeSettings {
    /// Host advertised in handshakes.
    pub host: String,
    /// Port advertised in handshakes.
    pub port: u16,
    /// Largest wire frame read or written on a peer connection.
    pub max_frame_length: usize,
    pub admission: AdmissionConfig,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            admission: AdmissionConfig::default(),
        }
    }
}

/// A peer of the energy-trading network.
pub struct Node {
    identity: Arc<dyn Identity>,
    address: Address,
    state: Mutex<NodeState>,
    store: LedgerStore,
    oracle: Arc<dyn ApprovalOracle>,
    observer: Arc<dyn LedgerObserver>,
    settings: NodeSettings,
}

impl Node {
    /// Builds a node over `chain`, which is either a fresh genesis chain or
    /// what `store` loaded at startup.
    pub fn new(
        identity: Arc<dyn Identity>,
        chain: Chain,
        store: LedgerStore,
        oracle: Arc<dyn ApprovalOracle>,
        observer: Arc<dyn LedgerObserver>,
        settings: NodeSettings,
    ) -> Arc<Self> {
        let engine = LedgerEngine::new(
            chain,
            CombinedValidator::new(SignatureValidity::new(Ed25519Verifier), RotationValidity),
            Ed25519Verifier,
        );
        Arc::new(Self {
            address: identity.address(),
            identity,
            state: Mutex::new(NodeState {
                engine,
                peers: PeerTable::new(),
            }),
            store,
            oracle,
            observer,
            settings,
        })
    }

    /// This node's address.
    pub fn address(&self) -> Address {
        self.address.clone()
    }

    pub fn max_frame_length(&self) -> usize {
        self.settings.max_frame_length
    }

    /// Exclusive access to the ledger and peer table.
    pub async fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().await
    }

    /// Snapshot of the current chain.
    pub async fn chain(&self) -> Chain {
        self.lock().await.engine.chain().clone()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.lock().await.engine.chain().blocks.clone()
    }

    pub async fn validators(&self) -> Vec<Validator> {
        self.lock().await.engine.chain().validators.clone()
    }

    pub async fn height(&self) -> u64 {
        self.lock().await.engine.height()
    }

    pub async fn peers(&self) -> Vec<(Address, Peer)> {
        self.lock().await.peers.snapshot()
    }

    /// Connected peers that are registered validators, excluding self.
    pub async fn connected_validators(&self) -> Vec<Address> {
        let state = self.lock().await;
        self.validator_links(&state)
    }

    /// Net reputation change `peer` has accumulated from settled contracts.
    pub async fn reputation_delta(&self, peer: &Address) -> f64 {
        self.lock().await.engine.chain().reputation_delta(peer)
    }

    pub async fn is_validator(&self) -> bool {
        self.lock().await.engine.chain().is_validator(&self.address)
    }

    /// Drops peers whose connection has gone away.
    pub async fn prune_peers(&self) -> usize {
        let removed = self.lock().await.peers.prune_closed();
        if removed > 0 {
            debug!(removed, "pruned disconnected peers");
        }
        removed
    }

    /// The handshake this node sends on every new connection.
    pub fn handshake_envelope(&self) -> Result<Envelope, ProtocolError> {
        let info = HandshakeInfo {
            host: self.settings.host.clone(),
            port: self.settings.port,
            public_key: self.address.clone(),
        };
        Envelope::new(MessageKind::Handshake, self.address.clone(), Address::default(), &info)
            .map_err(ProtocolError::Encode)
    }

    // ------------------------------------------------------------------
    // Collaborator-facing actions
    // ------------------------------------------------------------------

    /// Sends one message to a known peer.
    pub async fn send_to_peer<T: Serialize + ?Sized>(
        &self,
        to: &Address,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), ProtocolError> {
        let state = self.lock().await;
        self.send_locked(&state, to, kind, payload)
    }

    /// Sends one message to every connected peer. Returns how many peers
    /// it was queued for.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        kind: MessageKind,
        payload: &T,
    ) -> Result<usize, ProtocolError> {
        let state = self.lock().await;
        self.broadcast_locked(&state, kind, payload)
    }

    /// Asks `producer` to sell `amount` units at up to `rate` per unit.
    ///
    /// The contract draft is signed as consumer and gets a fresh id, which
    /// is returned.
    pub async fn send_buy_request(
        &self,
        producer: &Address,
        amount: f64,
        rate: f64,
    ) -> Result<String, ProtocolError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut contract = Contract::draft(producer.clone(), self.address(), id.clone(), amount, rate);
        contract.consumer_sign = Some(self.identity.sign(&contract.signing_hash()));

        self.send_to_peer(producer, MessageKind::BuyElectricity, &contract)
            .await?;
        info!(producer = %producer, contract = %id, amount, rate, "sent buy request");
        Ok(id)
    }

    /// Asks a randomly chosen connected validator to admit this node.
    pub async fn send_admission_request(&self) -> Result<Address, ProtocolError> {
        let state = self.lock().await;
        if state.engine.chain().is_validator(&self.address) {
            return Err(ProtocolError::AlreadyValidator);
        }
        let target = self
            .validator_links(&state)
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ProtocolError::NoValidatorAvailable)?;

        let request = AdmissionRequest {
            address: self.address(),
        };
        self.send_locked(&state, &target, MessageKind::ValidatorApproval, &request)?;
        info!(validator = %target, "sent admission request");
        Ok(target)
    }

    /// Asks `peer` for its full ledger state.
    pub async fn send_sync_request(&self, peer: &Address) -> Result<(), ProtocolError> {
        self.send_to_peer(peer, MessageKind::SyncRequest, "").await?;
        info!(peer = %peer, "sent sync request");
        Ok(())
    }

    /// Reports, as consumer, whether a contract on the chain was honoured.
    pub async fn report_fulfillment(
        &self,
        contract_id: &str,
        fulfilled: bool,
    ) -> Result<usize, ProtocolError> {
        let state = self.lock().await;
        let (_, contract) = state
            .engine
            .chain()
            .find_contract(contract_id)
            .ok_or_else(|| ProtocolError::UnknownContract(contract_id.to_string()))?;
        if contract.consumer != self.address {
            return Err(ProtocolError::NotConsumer(contract_id.to_string()));
        }

        let mut report = FulfillmentReport::new(contract_id, fulfilled);
        report.consumer_sign = Some(self.identity.sign(&report.signing_hash()));
        let sent = self.broadcast_locked(&state, MessageKind::ContractFulfillment, &report)?;
        info!(contract = contract_id, fulfilled, sent, "reported contract fulfillment");
        Ok(sent)
    }

    // ------------------------------------------------------------------
    // Inbound messages
    // ------------------------------------------------------------------

    /// Handles one inbound envelope. `link` is the connection it arrived
    /// on, used to register the sender on handshake.
    ///
    /// Errors are logged and swallowed here: no message can take the node
    /// down.
    pub async fn process(self: &Arc<Self>, envelope: Envelope, link: Option<PeerLink>) {
        let kind = envelope.kind;
        let from = envelope.from.clone();
        if let Err(e) = self.dispatch(envelope, link).await {
            warn!(kind = %kind, from = %from, error = %e, "dropped protocol message");
        }
    }

    async fn dispatch(self: &Arc<Self>, env: Envelope, link: Option<PeerLink>) -> Result<(), ProtocolError> {
        match env.kind {
            MessageKind::Handshake => self.on_handshake(env, link).await,
            MessageKind::Testing => {
                let text = env.decode::<String>().unwrap_or_else(|_| env.payload.clone());
                info!(from = %env.from, text = %text, "testing message");
                Ok(())
            }
            MessageKind::BlockAdditionContractUnvalidated => self.on_unvalidated_contract(env).await,
            MessageKind::BlockAdditionReputationUnvalidated => {
                self.on_unvalidated_reputation(env).await
            }
            MessageKind::BlockAdditionContract | MessageKind::BlockAdditionReputation => {
                self.on_validated_block(env).await
            }
            MessageKind::ValidatorAddition => self.on_validator_addition(env).await,
            MessageKind::ValidatorApproval => self.on_admission_request(env).await,
            MessageKind::ValidatorRejection => {
                info!(approver = %env.from, "admission request rejected");
                self.observer.admission_rejected(&env.from);
                Ok(())
            }
            MessageKind::BuyElectricity => self.on_buy_request(env).await,
            MessageKind::ContractFulfillment => self.on_fulfillment(env).await,
            MessageKind::SyncRequest => self.on_sync_request(env).await,
            MessageKind::SyncResponse => self.on_sync_response(env).await,
        }
    }

    async fn on_handshake(&self, env: Envelope, link: Option<PeerLink>) -> Result<(), ProtocolError> {
        let info: HandshakeInfo = decode(&env)?;
        let mut state = self.lock().await;
        if state.peers.register(env.from.clone(), info, link) {
            info!(peer = %env.from, peers = state.peers.len(), "registered peer");
        }
        Ok(())
    }

    async fn on_unvalidated_contract(&self, env: Envelope) -> Result<(), ProtocolError> {
        let block: Block = match env.decode() {
            Ok(block) => block,
            Err(source) => {
                if let Some((consumer, id)) = raw_contract_consumer(&env.payload) {
                    if consumer == self.address {
                        self.observer.contract_request_invalid(id.as_deref());
                    }
                }
                return Err(ProtocolError::MalformedPayload {
                    kind: env.kind,
                    source,
                });
            }
        };
        let Some(contract) = block.contract() else {
            return Err(ProtocolError::UnexpectedBody {
                kind: env.kind,
                index: block.index,
            });
        };
        if contract.consumer == self.address {
            debug!(index = block.index, "not validating own purchase");
            return Ok(());
        }

        let mut state = self.lock().await;
        self.countersign_and_publish(&mut state, &block, MessageKind::BlockAdditionContract)
    }

    async fn on_unvalidated_reputation(&self, env: Envelope) -> Result<(), ProtocolError> {
        let block: Block = decode(&env)?;
        let Some(rep) = block.reputation() else {
            return Err(ProtocolError::UnexpectedBody {
                kind: env.kind,
                index: block.index,
            });
        };
        if block.creator == self.address {
            return Ok(());
        }
        if rep.peer == self.address {
            debug!(index = block.index, "not validating own reputation change");
            return Ok(());
        }

        let mut state = self.lock().await;
        self.countersign_and_publish(&mut state, &block, MessageKind::BlockAdditionReputation)
    }

    async fn on_validated_block(&self, env: Envelope) -> Result<(), ProtocolError> {
        let block: Block = decode(&env)?;
        let own_contract = block
            .contract()
            .filter(|c| c.consumer == self.address || c.producer == self.address)
            .cloned();

        let mut state = self.lock().await;
        self.append(&mut state, block)?;

        if let Some(contract) = own_contract {
            info!(contract = %contract.id, "contract completed");
            self.observer.contract_completed(&contract);
        }
        Ok(())
    }

    async fn on_validator_addition(&self, env: Envelope) -> Result<(), ProtocolError> {
        let validator: Validator = decode(&env)?;
        let mut state = self.lock().await;
        match self.admit(&mut state, validator) {
            Err(ProtocolError::InvalidValidator(e)) => {
                debug!(from = %env.from, error = %e, "ignoring validator record");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn on_admission_request(self: &Arc<Self>, env: Envelope) -> Result<(), ProtocolError> {
        let request: AdmissionRequest = decode(&env)?;
        if request.address != env.from {
            return Err(ProtocolError::SenderMismatch {
                from: env.from,
                expected: request.address,
            });
        }

        let delay = self.oracle.delay();
        if delay.is_zero() {
            return self.answer_admission(request.address).await;
        }

        // Fire and forget: a pending answer is lost if the node stops.
        let node = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = node.answer_admission(request.address).await {
                warn!(error = %e, "failed to answer admission request");
            }
        });
        Ok(())
    }

    async fn answer_admission(&self, candidate: Address) -> Result<(), ProtocolError> {
        let mut state = self.lock().await;
        let Some(grant) = self.oracle.decide(&candidate) else {
            info!(candidate = %candidate, "rejecting admission request");
            let notice = AdmissionRequest { address: candidate.clone() };
            return self.send_locked(&state, &candidate, MessageKind::ValidatorRejection, &notice);
        };

        let validator = Validator::admit(
            candidate,
            self.identity.as_ref(),
            self.settings.admission.initial_reputation,
            grant.energy_capacity,
            grant.energy_rate,
        );
        if self.admit(&mut state, validator.clone())? == Admission::Added {
            self.broadcast_locked(&state, MessageKind::ValidatorAddition, &validator)?;
        }
        Ok(())
    }

    async fn on_buy_request(&self, env: Envelope) -> Result<(), ProtocolError> {
        let contract: Contract = decode(&env)?;
        let state = self.lock().await;
        let chain = state.engine.chain();

        let Some(me) = chain.validator(&self.address).filter(|v| v.is_active()) else {
            debug!(contract = %contract.id, "not an active validator, ignoring buy request");
            return Ok(());
        };
        if !(contract.amount > 0.0 && contract.rate > 0.0) {
            debug!(
                contract = %contract.id,
                amount = contract.amount,
                rate = contract.rate,
                "non-positive contract terms"
            );
            return Ok(());
        }
        if contract.producer != self.address || contract.consumer != env.from {
            debug!(contract = %contract.id, "buy request parties do not match");
            return Ok(());
        }
        if me.energy_capacity <= contract.amount || me.energy_rate > contract.rate {
            debug!(
                contract = %contract.id,
                amount = contract.amount,
                rate = contract.rate,
                "capacity or rate insufficient"
            );
            return Ok(());
        }
        if chain.find_contract(&contract.id).is_some() {
            debug!(contract = %contract.id, "duplicate contract id");
            return Ok(());
        }

        let hash = contract.signing_hash();
        let consumer_signed = contract
            .consumer_sign
            .as_ref()
            .is_some_and(|sig| self.identity.verify(&contract.consumer, sig, &hash));
        if !consumer_signed {
            debug!(contract = %contract.id, "consumer signature invalid");
            return Ok(());
        }
        let Some(tip) = chain.tip() else {
            return Ok(());
        };

        let mut contract = contract;
        contract.producer_sign = Some(self.identity.sign(&hash));
        let id = contract.id.clone();
        let block = Block::create_contract_block(tip, contract, self.identity.as_ref())?;
        let sent = self.broadcast_locked(&state, MessageKind::BlockAdditionContractUnvalidated, &block)?;
        info!(contract = %id, index = block.index, sent, "produced contract block");
        Ok(())
    }

    async fn on_fulfillment(&self, env: Envelope) -> Result<(), ProtocolError> {
        let report: FulfillmentReport = decode(&env)?;
        let state = self.lock().await;
        if !state.is_active_validator(&self.address) {
            return Ok(());
        }

        let chain = state.engine.chain();
        let (related, contract) = chain
            .find_contract(&report.contract_id)
            .ok_or_else(|| ProtocolError::UnknownContract(report.contract_id.clone()))?;
        if contract.producer == self.address {
            debug!(contract = %contract.id, "not settling own sale");
            return Ok(());
        }
        if chain.is_settled(&contract.id) {
            debug!(contract = %contract.id, "contract already settled");
            return Ok(());
        }
        let consumer_signed = report
            .consumer_sign
            .as_ref()
            .is_some_and(|sig| self.identity.verify(&contract.consumer, sig, &report.signing_hash()));
        if !consumer_signed {
            debug!(contract = %contract.id, "fulfillment report not signed by consumer");
            return Ok(());
        }

        let mut related = related.clone();
        if let BlockBody::Contract(c) = &mut related.body {
            c.fulfilled = report.fulfilled;
        }
        let Some(tip) = chain.tip() else {
            return Ok(());
        };
        let mut block = Block::create_reputation_block(tip, &related)?;
        block.seal(self.identity.as_ref());

        let sent =
            self.broadcast_locked(&state, MessageKind::BlockAdditionReputationUnvalidated, &block)?;
        info!(contract = %report.contract_id, index = block.index, sent, "produced reputation block");
        Ok(())
    }

    async fn on_sync_request(&self, env: Envelope) -> Result<(), ProtocolError> {
        let state = self.lock().await;
        self.send_locked(&state, &env.from, MessageKind::SyncResponse, state.engine.chain())?;
        info!(peer = %env.from, height = state.engine.height(), "answered sync request");
        Ok(())
    }

    async fn on_sync_response(&self, env: Envelope) -> Result<(), ProtocolError> {
        let remote: Chain = decode(&env)?;
        let mut state = self.lock().await;
        state.engine.replace_chain(remote);
        self.store.save_chain(state.engine.chain())?;

        let height = state.engine.height();
        info!(peer = %env.from, height, "sync completed");
        self.observer.sync_completed(&env.from, height);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers; all expect the state lock to be held.
    // ------------------------------------------------------------------

    /// Countersigns `block` if this node may, then appends, persists and
    /// broadcasts it as `kind`.
    fn countersign_and_publish(
        &self,
        state: &mut NodeState,
        block: &Block,
        kind: MessageKind,
    ) -> Result<(), ProtocolError> {
        if !state.is_active_validator(&self.address) {
            debug!(index = block.index, "not an eligible validator");
            return Ok(());
        }
        let Some(validated) = state.engine.validate_block(self.identity.as_ref(), block) else {
            debug!(index = block.index, "block not countersigned");
            return Ok(());
        };

        self.append(state, validated.clone())?;
        let sent = self.broadcast_locked(state, kind, &validated)?;
        info!(index = validated.index, sent, "countersigned block");
        Ok(())
    }

    fn append(&self, state: &mut NodeState, block: Block) -> Result<(), ProtocolError> {
        let started = Instant::now();
        if let Err(e) = state.engine.add_block(block.clone()) {
            self.observer.block_rejected(&block, &e);
            return Err(e.into());
        }
        let elapsed = started.elapsed();

        self.store.save_blocks(&state.engine.chain().blocks)?;
        info!(index = block.index, kind = block.body.kind(), "appended block");
        self.observer.block_appended(&block, elapsed);
        Ok(())
    }

    fn admit(&self, state: &mut NodeState, validator: Validator) -> Result<Admission, ProtocolError> {
        let admission = state
            .engine
            .add_validator(validator.clone())
            .map_err(ProtocolError::InvalidValidator)?;
        if admission == Admission::Added {
            self.store.save_validators(&state.engine.chain().validators)?;
            info!(validator = %validator.address, approved_by = %validator.approved_by, "admitted validator");
            self.observer.validator_admitted(&validator);
        }
        Ok(admission)
    }

    fn validator_links(&self, state: &NodeState) -> Vec<Address> {
        let chain = state.engine.chain();
        state
            .peers
            .connected()
            .into_iter()
            .filter(|a| a != &self.address && chain.is_validator(a))
            .collect()
    }

    fn send_locked<T: Serialize + ?Sized>(
        &self,
        state: &NodeState,
        to: &Address,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), ProtocolError> {
        let env = Envelope::new(kind, self.address(), to.clone(), payload)
            .map_err(ProtocolError::Encode)?;
        if state.peers.send(to, env) {
            Ok(())
        } else {
            Err(ProtocolError::UnknownPeer(to.clone()))
        }
    }

    fn broadcast_locked<T: Serialize + ?Sized>(
        &self,
        state: &NodeState,
        kind: MessageKind,
        payload: &T,
    ) -> Result<usize, ProtocolError> {
        if state.peers.is_empty() {
            debug!(%kind, "no peers to broadcast to");
            return Ok(0);
        }
        let env = Envelope::new(kind, self.address(), Address::default(), payload)
            .map_err(ProtocolError::Encode)?;
        let sent = state
            .peers
            .connected()
            .into_iter()
            .filter(|to| state.peers.send(to, env.readdressed(to.clone())))
            .count();
        Ok(sent)
    }
}

fn decode<T: serde::de::DeserializeOwned>(env: &Envelope) -> Result<T, ProtocolError> {
    env.decode().map_err(|source| ProtocolError::MalformedPayload {
        kind: env.kind,
        source,
    })
}

/// Best-effort read of `body.Contract.consumer` (and id) from a payload
/// that did not decode as a block.
fn raw_contract_consumer(payload: &str) -> Option<(Address, Option<String>)> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let contract = value.get("body")?.get("Contract")?;
    let consumer = contract.get("consumer")?.as_str()?;
    let id = contract.get("id").and_then(|v| v.as_str()).map(str::to_string);
    Some((Address::new(consumer), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::identity::Wallet;
    use crate::protocol::oracle::StaticApprovalOracle;
    use crate::storage::{InMemoryStore, KeyValueStore, VALIDATORS_KEY};
    use crate::testutil::{chain_with, contract_block, countersign, reputation_block, wallet};

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, event: String) {
            self.events.lock().expect("recorder lock").push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().expect("recorder lock").clone()
        }
    }

    impl LedgerObserver for Recorder {
        fn block_rejected(&self, block: &Block, _error: &ConsensusError) {
            self.push(format!("rejected:{}", block.index));
        }
        fn admission_rejected(&self, approver: &Address) {
            self.push(format!("admission-rejected:{approver}"));
        }
        fn sync_completed(&self, _from: &Address, height: u64) {
            self.push(format!("synced:{height}"));
        }
        fn contract_completed(&self, contract: &Contract) {
            self.push(format!("completed:{}", contract.id));
        }
        fn contract_request_invalid(&self, contract_id: Option<&str>) {
            self.push(format!("invalid:{}", contract_id.unwrap_or("?")));
        }
    }

    struct Harness {
        node: Arc<Node>,
        recorder: Arc<Recorder>,
        backend: Arc<InMemoryStore>,
    }

    fn harness(seed: u8, chain: Chain, oracle: StaticApprovalOracle) -> Harness {
        let recorder = Arc::new(Recorder::default());
        let backend = Arc::new(InMemoryStore::new());
        let node = Node::new(
            Arc::new(wallet(seed)),
            chain,
            LedgerStore::new(backend.clone()),
            Arc::new(oracle),
            recorder.clone(),
            NodeSettings::default(),
        );
        Harness {
            node,
            recorder,
            backend,
        }
    }

    fn node(seed: u8, chain: Chain) -> Harness {
        harness(seed, chain, StaticApprovalOracle::accepting(15.0, 2.0))
    }

    /// Registers `peer` in `node`'s table and returns what `node` sends it.
    async fn link(node: &Arc<Node>, peer: &Wallet) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let info = HandshakeInfo {
            host: "127.0.0.1".to_string(),
            port: 7001,
            public_key: peer.address(),
        };
        let hello = Envelope::new(MessageKind::Handshake, peer.address(), node.address(), &info)
            .expect("handshake");
        node.process(hello, Some(tx)).await;
        rx
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>, kind: MessageKind) -> Envelope {
        let env = rx.try_recv().expect("an envelope was sent");
        assert_eq!(env.kind, kind);
        env
    }

    #[tokio::test]
    async fn handshake_registers_peer_once() {
        let h = node(1, chain_with(&[(&wallet(1), 10.0)]));
        let peer = wallet(2);
        let _rx = link(&h.node, &peer).await;

        let other = HandshakeInfo {
            host: "10.0.0.9".to_string(),
            port: 9999,
            public_key: peer.address(),
        };
        let again = Envelope::new(MessageKind::Handshake, peer.address(), h.node.address(), &other)
            .expect("handshake");
        h.node.process(again, None).await;

        let peers = h.node.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].1.port, 7001);
        assert_eq!(peers[0].1.seq, 0);
    }

    #[tokio::test]
    async fn buy_request_flows_into_a_validated_contract_block() {
        let (v, p, c) = (wallet(1), wallet(2), wallet(3));
        let chain = chain_with(&[(&v, 10.0), (&p, 1.0)]);
        let validator = node(1, chain.clone());
        let producer = node(2, chain.clone());
        let consumer = node(3, chain);

        let mut c_to_p = link(&consumer.node, &p).await;
        let mut p_to_v = link(&producer.node, &v).await;
        let mut p_to_c = link(&producer.node, &c).await;
        let mut v_to_p = link(&validator.node, &p).await;
        let mut v_to_c = link(&validator.node, &c).await;

        let id = consumer
            .node
            .send_buy_request(&p.address(), 5.0, 2.0)
            .await
            .expect("buy request sent");
        let buy = next(&mut c_to_p, MessageKind::BuyElectricity);
        producer.node.process(buy, None).await;

        let unvalidated = next(&mut p_to_v, MessageKind::BlockAdditionContractUnvalidated);
        let copy = next(&mut p_to_c, MessageKind::BlockAdditionContractUnvalidated);
        // The consumer never validates its own purchase.
        consumer.node.process(copy, None).await;
        assert_eq!(consumer.node.height().await, 0);

        validator.node.process(unvalidated, None).await;
        assert_eq!(validator.node.height().await, 1);

        let to_p = next(&mut v_to_p, MessageKind::BlockAdditionContract);
        let to_c = next(&mut v_to_c, MessageKind::BlockAdditionContract);
        producer.node.process(to_p, None).await;
        consumer.node.process(to_c, None).await;

        let tip = consumer.node.chain().await;
        assert_eq!(tip.height, 1);
        let block = tip.tip().expect("tip");
        assert_eq!(block.validator, Some(v.address()));
        assert_eq!(block.contract().map(|c| c.id.clone()), Some(id.clone()));
        assert_eq!(producer.node.chain().await, tip);
        assert_eq!(validator.node.chain().await, tip);
        assert_eq!(consumer.recorder.events(), vec![format!("completed:{id}")]);
        assert!(consumer.backend.get("blocks").expect("get").is_some());
    }

    #[tokio::test]
    async fn producer_refuses_buy_beyond_capacity_below_its_rate_or_non_positive() {
        let (p, c) = (wallet(2), wallet(3));
        // Capacity 20, rate 1.
        let chain = chain_with(&[(&p, 10.0)]);
        let producer = node(2, chain.clone());
        let consumer = node(3, chain);
        let mut c_to_p = link(&consumer.node, &p).await;
        let mut p_to_c = link(&producer.node, &c).await;

        let refused = [(20.0, 5.0), (25.0, 5.0), (5.0, 0.5), (0.0, 5.0), (-3.0, 5.0), (5.0, 0.0)];
        for (amount, rate) in refused {
            consumer
                .node
                .send_buy_request(&p.address(), amount, rate)
                .await
                .expect("sent");
            let buy = next(&mut c_to_p, MessageKind::BuyElectricity);
            producer.node.process(buy, None).await;
            assert!(p_to_c.try_recv().is_err(), "amount {amount} rate {rate} must be refused");
        }

        consumer
            .node
            .send_buy_request(&p.address(), 19.0, 1.0)
            .await
            .expect("sent");
        let buy = next(&mut c_to_p, MessageKind::BuyElectricity);
        producer.node.process(buy, None).await;
        next(&mut p_to_c, MessageKind::BlockAdditionContractUnvalidated);
    }

    #[tokio::test]
    async fn buy_request_with_forged_consumer_signature_is_dropped() {
        let (p, c, mallory) = (wallet(2), wallet(3), wallet(9));
        let chain = chain_with(&[(&p, 10.0)]);
        let producer = node(2, chain);
        let mut p_to_c = link(&producer.node, &c).await;

        let mut contract = Contract::draft(p.address(), c.address(), "forged", 1.0, 2.0);
        contract.consumer_sign = Some(mallory.sign(&contract.signing_hash()));
        let env = Envelope::new(MessageKind::BuyElectricity, c.address(), p.address(), &contract)
            .expect("envelope");
        producer.node.process(env, None).await;

        assert!(p_to_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_contract_for_self_is_reported() {
        let c = wallet(3);
        let consumer = node(3, chain_with(&[(&wallet(1), 10.0)]));
        let payload = serde_json::json!({
            "body": { "Contract": { "consumer": c.address().as_str(), "id": "c-9" } },
            "index": "not a number"
        });
        let env = Envelope {
            to: c.address(),
            from: wallet(2).address(),
            kind: MessageKind::BlockAdditionContractUnvalidated,
            payload: payload.to_string(),
        };
        consumer.node.process(env, None).await;

        assert_eq!(consumer.recorder.events(), vec!["invalid:c-9".to_string()]);
    }

    #[tokio::test]
    async fn validated_block_failing_checks_is_reported_not_appended() {
        let (v0, stranger) = (wallet(1), wallet(7));
        let chain = chain_with(&[(&v0, 10.0)]);
        let receiver = node(2, chain.clone());

        let block = countersign(reputation_block(&chain, &v0), &stranger);
        let env = Envelope::new(MessageKind::BlockAdditionReputation, v0.address(), Address::default(), &block)
            .expect("envelope");
        receiver.node.process(env, None).await;

        assert_eq!(receiver.node.height().await, 0);
        assert_eq!(receiver.recorder.events(), vec!["rejected:1".to_string()]);
    }

    #[tokio::test]
    async fn accepted_admission_is_persisted_and_propagated() {
        let (a, r) = (wallet(1), wallet(2));
        let chain = chain_with(&[(&a, 10.0)]);
        let approver = node(1, chain.clone());
        let requester = node(2, chain);
        let mut r_to_a = link(&requester.node, &a).await;
        let mut a_to_r = link(&approver.node, &r).await;

        let target = requester
            .node
            .send_admission_request()
            .await
            .expect("request sent");
        assert_eq!(target, a.address());

        let request = next(&mut r_to_a, MessageKind::ValidatorApproval);
        approver.node.process(request, None).await;

        let admitted = approver.node.validators().await;
        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted[1].address, r.address());
        assert_eq!(admitted[1].approved_by, a.address());
        assert_eq!(admitted[1].energy_capacity, 15.0);
        let stored = approver.backend.get(VALIDATORS_KEY).expect("get").expect("persisted");
        let stored: Vec<Validator> = serde_json::from_slice(&stored).expect("decode");
        assert_eq!(stored, admitted);

        let addition = next(&mut a_to_r, MessageKind::ValidatorAddition);
        requester.node.process(addition.clone(), None).await;
        assert!(requester.node.is_validator().await);

        // Re-delivery leaves the registry unchanged.
        requester.node.process(addition, None).await;
        assert_eq!(requester.node.validators().await.len(), 2);
        assert!(matches!(
            requester.node.send_admission_request().await,
            Err(ProtocolError::AlreadyValidator)
        ));
    }

    #[tokio::test]
    async fn rejected_admission_replies_with_rejection_notice() {
        let (a, r) = (wallet(1), wallet(2));
        let chain = chain_with(&[(&a, 10.0)]);
        let approver = harness(1, chain.clone(), StaticApprovalOracle::rejecting());
        let requester = node(2, chain);
        let mut a_to_r = link(&approver.node, &r).await;

        let request = Envelope::new(
            MessageKind::ValidatorApproval,
            r.address(),
            a.address(),
            &AdmissionRequest { address: r.address() },
        )
        .expect("envelope");
        approver.node.process(request, None).await;
        assert_eq!(approver.node.validators().await.len(), 1);

        let notice = next(&mut a_to_r, MessageKind::ValidatorRejection);
        requester.node.process(notice, None).await;
        assert_eq!(
            requester.recorder.events(),
            vec![format!("admission-rejected:{}", a.address())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_admission_answers_once_the_delay_elapses() {
        let (a, r) = (wallet(1), wallet(2));
        let chain = chain_with(&[(&a, 10.0)]);
        let oracle = StaticApprovalOracle::accepting(15.0, 2.0).with_delay(Duration::from_millis(500));
        let approver = harness(1, chain, oracle);
        let mut a_to_r = link(&approver.node, &r).await;

        let request = Envelope::new(
            MessageKind::ValidatorApproval,
            r.address(),
            a.address(),
            &AdmissionRequest { address: r.address() },
        )
        .expect("envelope");
        approver.node.process(request, None).await;
        tokio::task::yield_now().await;
        assert!(a_to_r.try_recv().is_err());
        assert_eq!(approver.node.validators().await.len(), 1);

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert!(a_to_r.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(200)).await;
        let addition = tokio::time::timeout(Duration::from_secs(1), a_to_r.recv())
            .await
            .expect("answered after the delay")
            .expect("link open");
        assert_eq!(addition.kind, MessageKind::ValidatorAddition);
        let admitted: Validator = addition.decode().expect("validator payload");
        assert_eq!(admitted.address, r.address());
        assert_eq!(approver.node.validators().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_rejection_still_reaches_the_candidate() {
        let (a, r) = (wallet(1), wallet(2));
        let oracle = StaticApprovalOracle::rejecting().with_delay(Duration::from_millis(250));
        let approver = harness(1, chain_with(&[(&a, 10.0)]), oracle);
        let mut a_to_r = link(&approver.node, &r).await;

        let request = Envelope::new(
            MessageKind::ValidatorApproval,
            r.address(),
            a.address(),
            &AdmissionRequest { address: r.address() },
        )
        .expect("envelope");
        approver.node.process(request, None).await;
        assert!(a_to_r.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(300)).await;
        let notice = tokio::time::timeout(Duration::from_secs(1), a_to_r.recv())
            .await
            .expect("answered after the delay")
            .expect("link open");
        assert_eq!(notice.kind, MessageKind::ValidatorRejection);
        assert_eq!(approver.node.validators().await.len(), 1);
    }

    #[tokio::test]
    async fn validator_addition_with_bad_approval_is_ignored() {
        let (a, r, mallory) = (wallet(1), wallet(2), wallet(9));
        let receiver = node(3, chain_with(&[(&a, 10.0)]));

        let mut forged = Validator::admit(r.address(), &mallory, 1.0, 10.0, 1.0);
        forged.approved_by = a.address();
        let env = Envelope::new(MessageKind::ValidatorAddition, a.address(), Address::default(), &forged)
            .expect("envelope");
        receiver.node.process(env, None).await;

        assert_eq!(receiver.node.validators().await.len(), 1);
    }

    #[tokio::test]
    async fn sync_response_replaces_local_state_exactly() {
        let (v0, v1) = (wallet(1), wallet(2));
        let mut remote = chain_with(&[(&v0, 10.0), (&v1, 1.0)]);
        for i in 0..5 {
            let signer = if i % 2 == 0 { &v0 } else { &v1 };
            let block = countersign(reputation_block(&remote, &v0), signer);
            remote.height = block.index;
            remote.blocks.push(block);
        }
        let sender = node(1, remote.clone());

        let mut local = chain_with(&[(&wallet(5), 10.0)]);
        let block = countersign(reputation_block(&local, &wallet(5)), &wallet(5));
        local.height = 1;
        local.blocks.push(block);
        let receiver = node(5, local);

        let mut s_to_r = link(&sender.node, &wallet(5)).await;
        let request = Envelope::new(MessageKind::SyncRequest, wallet(5).address(), v0.address(), "")
            .expect("envelope");
        sender.node.process(request, None).await;

        let response = next(&mut s_to_r, MessageKind::SyncResponse);
        receiver.node.process(response, None).await;

        let adopted = receiver.node.chain().await;
        assert_eq!(adopted, remote);
        assert_eq!(adopted.height, 5);
        assert_eq!(adopted.validators.len(), 2);
        assert_eq!(receiver.recorder.events(), vec!["synced:5".to_string()]);
        let reloaded = LedgerStore::new(receiver.backend.clone())
            .load_or_init(chain_with(&[(&wallet(6), 1.0)]))
            .expect("reload");
        assert_eq!(reloaded, remote);
    }

    #[tokio::test]
    async fn fulfillment_report_settles_contract_with_reputation_block() {
        let (v, p, w, c, x) = (wallet(1), wallet(2), wallet(3), wallet(4), wallet(5));
        let mut chain = chain_with(&[(&v, 10.0), (&p, 1.0), (&w, 1.0), (&x, 1.0)]);
        let block = countersign(contract_block(&chain, &p, &c, "c-1"), &v);
        chain.height = 1;
        chain.blocks.push(block);

        let consumer = node(4, chain.clone());
        let settler = node(3, chain.clone());
        let witness = node(5, chain.clone());
        let producer = node(2, chain);
        let mut c_to_w = link(&consumer.node, &w).await;
        let mut w_to_x = link(&settler.node, &x).await;
        let mut x_to_w = link(&witness.node, &w).await;
        let mut p_to_w = link(&producer.node, &w).await;

        consumer
            .node
            .report_fulfillment("c-1", false)
            .await
            .expect("report sent");
        let report = next(&mut c_to_w, MessageKind::ContractFulfillment);
        settler.node.process(report.clone(), None).await;

        let unvalidated = next(&mut w_to_x, MessageKind::BlockAdditionReputationUnvalidated);

        // The penalized producer takes no part in settling its contract.
        producer.node.process(unvalidated.clone(), None).await;
        assert_eq!(producer.node.height().await, 1);
        assert!(p_to_w.try_recv().is_err());

        witness.node.process(unvalidated, None).await;
        assert_eq!(witness.node.height().await, 2);

        let validated = next(&mut x_to_w, MessageKind::BlockAdditionReputation);
        settler.node.process(validated, None).await;

        let chain = settler.node.chain().await;
        let tip = chain.tip().expect("tip");
        let rep = tip.reputation().expect("reputation body");
        assert_eq!(tip.creator, w.address());
        assert_eq!(tip.validator, Some(x.address()));
        assert_ne!(tip.validator, Some(p.address()));
        assert_eq!(rep.related_contract_id, "c-1");
        assert_eq!(rep.peer, p.address());
        assert!(rep.is_negative);
        assert_eq!(settler.node.reputation_delta(&p.address()).await, -5.0);
        assert_eq!(settler.node.reputation_delta(&x.address()).await, 0.0);

        // Once settled, the same report produces nothing new.
        settler.node.process(report, None).await;
        assert!(w_to_x.try_recv().is_err());
    }

    #[tokio::test]
    async fn fulfillment_can_only_be_reported_by_consumer() {
        let (v, p, c) = (wallet(1), wallet(2), wallet(4));
        let mut chain = chain_with(&[(&v, 10.0), (&p, 1.0)]);
        let block = countersign(contract_block(&chain, &p, &c, "c-1"), &v);
        chain.height = 1;
        chain.blocks.push(block);

        let producer = node(2, chain);
        assert!(matches!(
            producer.node.report_fulfillment("c-1", true).await,
            Err(ProtocolError::NotConsumer(_))
        ));
        assert!(matches!(
            producer.node.report_fulfillment("missing", true).await,
            Err(ProtocolError::UnknownContract(_))
        ));
    }

    #[tokio::test]
    async fn garbage_payloads_never_take_the_node_down() {
        let h = node(1, chain_with(&[(&wallet(1), 10.0)]));
        let kinds = [
            MessageKind::Handshake,
            MessageKind::Testing,
            MessageKind::BlockAdditionContract,
            MessageKind::BlockAdditionReputationUnvalidated,
            MessageKind::ValidatorAddition,
            MessageKind::ValidatorApproval,
            MessageKind::BuyElectricity,
            MessageKind::ContractFulfillment,
            MessageKind::SyncRequest,
            MessageKind::SyncResponse,
        ];
        for kind in kinds {
            let env = Envelope {
                to: h.node.address(),
                from: wallet(2).address(),
                kind,
                payload: "{not json".to_string(),
            };
            h.node.process(env, None).await;
        }
        assert_eq!(h.node.height().await, 0);
        assert_eq!(h.node.validators().await.len(), 1);
    }
}
