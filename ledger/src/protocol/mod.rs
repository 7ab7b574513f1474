//! Peer protocol: wire messages, the node context that handles them, the
//! admission oracle, observer hooks and the periodic driver.

pub mod driver;
pub mod message;
pub mod node;
pub mod observer;
pub mod oracle;

pub use driver::{DriverAction, DriverConfig, run_driver};
pub use message::{AdmissionRequest, Envelope, FulfillmentReport, HandshakeInfo, MessageKind};
pub use node::{Node, NodeSettings, NodeState, ProtocolError};
pub use observer::{LedgerObserver, NoopObserver};
pub use oracle::{AdmissionConfig, ApprovalOracle, Grant, RandomApprovalOracle, StaticApprovalOracle};
