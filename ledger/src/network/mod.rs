//! Transport adapters: the peer table and a framed TCP transport.

pub mod peer;
pub mod tcp;

pub use peer::{Peer, PeerLink, PeerTable};
