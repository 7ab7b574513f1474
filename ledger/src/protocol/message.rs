//! Wire envelope and payload records exchanged between peers.
//!
//! Every message is an [`Envelope`] whose `payload` is the JSON encoding of
//! a kind-specific record:
//!
//! | kind | payload |
//! |---|---|
//! | `HANDSHAKE` | [`HandshakeInfo`] |
//! | `TESTING` | free text |
//! | `BLOCK_ADDITION_*` | [`Block`](crate::types::Block) |
//! | `VALIDATOR_ADDITION` | [`Validator`](crate::types::Validator) |
//! | `VALIDATOR_APPROVAL`, `VALIDATOR_REJECTION` | [`AdmissionRequest`] |
//! | `BUY_ELECTRICITY` | [`Contract`](crate::types::Contract) |
//! | `CONTRACT_FULFILLMENT` | [`FulfillmentReport`] |
//! | `SYNC_REQUEST` | empty |
//! | `SYNC_RESPONSE` | [`Chain`](crate::consensus::Chain) |

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::types::{Address, Hash256, Signature, canonical_hash};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Handshake,
    Testing,
    BlockAdditionContractUnvalidated,
    BlockAdditionContract,
    BlockAdditionReputationUnvalidated,
    BlockAdditionReputation,
    ValidatorAddition,
    ValidatorApproval,
    ValidatorRejection,
    BuyElectricity,
    ContractFulfillment,
    SyncRequest,
    SyncResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Handshake => "HANDSHAKE",
            MessageKind::Testing => "TESTING",
            MessageKind::BlockAdditionContractUnvalidated => "BLOCK_ADDITION_CONTRACT_UNVALIDATED",
            MessageKind::BlockAdditionContract => "BLOCK_ADDITION_CONTRACT",
            MessageKind::BlockAdditionReputationUnvalidated => {
                "BLOCK_ADDITION_REPUTATION_UNVALIDATED"
            }
            MessageKind::BlockAdditionReputation => "BLOCK_ADDITION_REPUTATION",
            MessageKind::ValidatorAddition => "VALIDATOR_ADDITION",
            MessageKind::ValidatorApproval => "VALIDATOR_APPROVAL",
            MessageKind::ValidatorRejection => "VALIDATOR_REJECTION",
            MessageKind::BuyElectricity => "BUY_ELECTRICITY",
            MessageKind::ContractFulfillment => "CONTRACT_FULFILLMENT",
            MessageKind::SyncRequest => "SYNC_REQUEST",
            MessageKind::SyncResponse => "SYNC_RESPONSE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single addressed protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Recipient address. Empty on handshakes, which are sent before the
    /// remote identity is known.
    pub to: Address,
    pub from: Address,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// JSON encoding of the kind-specific payload record.
    pub payload: String,
}

impl Envelope {
    /// Builds an envelope whose payload is the JSON encoding of `payload`.
    pub fn new<T: Serialize + ?Sized>(
        kind: MessageKind,
        from: Address,
        to: Address,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            to,
            from,
            kind,
            payload: serde_json::to_string(payload)?,
        })
    }

    /// Decodes the payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Same envelope addressed to someone else.
    pub fn readdressed(&self, to: Address) -> Self {
        Self {
            to,
            ..self.clone()
        }
    }
}

/// Advertised contact information, sent on every new connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeInfo {
    pub host: String,
    pub port: u16,
    pub public_key: Address,
}

/// Request to be admitted as a validator, and the echo sent back on
/// rejection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub address: Address,
}

/// A consumer's signed statement that a contract was (or was not) honoured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentReport {
    pub contract_id: String,
    pub fulfilled: bool,
    pub consumer_sign: Option<Signature>,
}

impl FulfillmentReport {
    pub fn new(contract_id: impl Into<String>, fulfilled: bool) -> Self {
        Self {
            contract_id: contract_id.into(),
            fulfilled,
            consumer_sign: None,
        }
    }

    /// Hash the consumer signs: the report with its signature blanked.
    pub fn signing_hash(&self) -> Hash256 {
        let mut blank = self.clone();
        blank.consumer_sign = None;
        canonical_hash(&blank)
    }
}
