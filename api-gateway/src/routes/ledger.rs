use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use ledger::{Address, Block, Validator};

use crate::state::SharedState;

/// `GET /ledger/blocks`
///
/// The full block sequence, genesis first.
pub async fn blocks(State(state): State<SharedState>) -> Json<Vec<Block>> {
    Json(state.node.blocks().await)
}

/// `GET /ledger/validators`
pub async fn validators(State(state): State<SharedState>) -> Json<Vec<Validator>> {
    Json(state.node.validators().await)
}

#[derive(Debug, Serialize)]
pub struct AddressResponse {
    pub address: Address,
    pub height: u64,
    pub is_validator: bool,
}

/// `GET /ledger/address`
///
/// This node's address, with the chain height and whether it is a
/// registered validator.
pub async fn address(State(state): State<SharedState>) -> Json<AddressResponse> {
    Json(AddressResponse {
        address: state.node.address(),
        height: state.node.height().await,
        is_validator: state.node.is_validator().await,
    })
}

#[derive(Debug, Serialize)]
pub struct PeerResponse {
    pub address: Address,
    pub seq: u64,
    pub host: String,
    pub port: u16,
    pub connected: bool,
}

/// `GET /ledger/peers`
///
/// Known peers in handshake order.
pub async fn peers(State(state): State<SharedState>) -> Json<Vec<PeerResponse>> {
    let peers = state
        .node
        .peers()
        .await
        .into_iter()
        .map(|(address, peer)| PeerResponse {
            connected: peer.is_connected(),
            address,
            seq: peer.seq,
            host: peer.host,
            port: peer.port,
        })
        .collect();
    Json(peers)
}

#[derive(Debug, Serialize)]
pub struct ReputationResponse {
    pub address: Address,
    pub delta: f64,
}

/// `GET /ledger/reputation/{address}`
///
/// Net reputation change recorded on chain for `address` by settled
/// contracts.
pub async fn reputation(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Json<ReputationResponse> {
    let address = Address::new(address);
    let delta = state.node.reputation_delta(&address).await;
    Json(ReputationResponse { address, delta })
}
