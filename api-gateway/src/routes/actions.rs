use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use ledger::{Address, MessageKind, ProtocolError};

use crate::state::SharedState;

/// Request body for `POST /actions/buy`.
#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    /// Address of the producer to buy from.
    pub peer: String,
    pub amount: f64,
    /// Highest rate per unit the buyer accepts.
    pub rate: f64,
}

#[derive(Debug, Serialize)]
pub struct BuyResponse {
    pub status: &'static str,
    pub contract_id: String,
}

/// `POST /actions/buy`
///
/// Sends a signed buy request to a producer. The contract only reaches the
/// ledger if the producer accepts and a validator countersigns it.
pub async fn buy(
    State(state): State<SharedState>,
    Json(body): Json<BuyRequest>,
) -> Result<(StatusCode, Json<BuyResponse>), (StatusCode, String)> {
    if !(body.amount > 0.0 && body.rate > 0.0) {
        return Err(as_bad_request("amount and rate must be positive"));
    }
    let contract_id = state
        .node
        .send_buy_request(&Address::new(body.peer), body.amount, body.rate)
        .await
        .map_err(protocol_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BuyResponse {
            status: "sent",
            contract_id,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct AdmissionResponse {
    pub status: &'static str,
    pub validator: Address,
}

/// `POST /actions/admission`
///
/// Asks a connected validator to admit this node.
pub async fn admission(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<AdmissionResponse>), (StatusCode, String)> {
    let validator = state
        .node
        .send_admission_request()
        .await
        .map_err(protocol_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AdmissionResponse {
            status: "sent",
            validator,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub peer: String,
}

/// `POST /actions/sync`
///
/// Asks a peer for its full ledger; the reply replaces the local one.
pub async fn sync(
    State(state): State<SharedState>,
    Json(body): Json<SyncRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .node
        .send_sync_request(&Address::new(body.peer))
        .await
        .map_err(protocol_error)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentRequest {
    pub contract_id: String,
    pub fulfilled: bool,
}

#[derive(Debug, Serialize)]
pub struct SentResponse {
    pub status: &'static str,
    pub peers: usize,
}

/// `POST /actions/fulfillment`
///
/// Reports, as the buyer, whether a contract on the ledger was honoured.
pub async fn fulfillment(
    State(state): State<SharedState>,
    Json(body): Json<FulfillmentRequest>,
) -> Result<(StatusCode, Json<SentResponse>), (StatusCode, String)> {
    let peers = state
        .node
        .report_fulfillment(&body.contract_id, body.fulfilled)
        .await
        .map_err(protocol_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SentResponse {
            status: "sent",
            peers,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Recipient; broadcast to every peer when absent.
    pub peer: Option<String>,
    pub text: String,
}

/// `POST /actions/message`
///
/// Sends a TESTING message to one peer or to all of them.
pub async fn message(
    State(state): State<SharedState>,
    Json(body): Json<MessageRequest>,
) -> Result<(StatusCode, Json<SentResponse>), (StatusCode, String)> {
    let peers = match body.peer {
        Some(peer) => state
            .node
            .send_to_peer(&Address::new(peer), MessageKind::Testing, &body.text)
            .await
            .map(|_| 1),
        None => state.node.broadcast(MessageKind::Testing, &body.text).await,
    }
    .map_err(protocol_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SentResponse {
            status: "sent",
            peers,
        }),
    ))
}

fn protocol_error(e: ProtocolError) -> (StatusCode, String) {
    let status = match &e {
        ProtocolError::UnknownPeer(_) | ProtocolError::UnknownContract(_) => StatusCode::NOT_FOUND,
        ProtocolError::NoValidatorAvailable => StatusCode::SERVICE_UNAVAILABLE,
        ProtocolError::AlreadyValidator | ProtocolError::NotConsumer(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn as_bad_request(msg: &'static str) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_http_statuses() {
        let (status, body) = protocol_error(ProtocolError::UnknownPeer(Address::new("ab")));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("ab"));

        assert_eq!(
            protocol_error(ProtocolError::NoValidatorAvailable).0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            protocol_error(ProtocolError::AlreadyValidator).0,
            StatusCode::CONFLICT
        );
    }
}
