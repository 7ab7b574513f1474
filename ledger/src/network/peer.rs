//! Peer table: who this node has shaken hands with and how to reach them.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::message::{Envelope, HandshakeInfo};
use crate::types::Address;

/// Sending half of a connection's outbound queue. The transport drains the
/// receiving half onto the socket.
pub type PeerLink = mpsc::UnboundedSender<Envelope>;

/// A known peer.
#[derive(Clone, Debug, Serialize)]
pub struct Peer {
    /// Position in this node's handshake order.
    pub seq: u64,
    pub host: String,
    pub port: u16,
    pub public_key: Address,
    /// One entry per live connection to this peer, oldest first.
    #[serde(skip)]
    pub links: Vec<PeerLink>,
}

impl Peer {
    /// Whether envelopes can currently be delivered to this peer.
    pub fn is_connected(&self) -> bool {
        self.open_link().is_some()
    }

    fn open_link(&self) -> Option<&PeerLink> {
        self.links.iter().find(|l| !l.is_closed())
    }
}

/// Peers keyed by address, in handshake order.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<Address, Peer>,
    next_seq: u64,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `from` on its first handshake and returns `true`.
    ///
    /// Later handshakes from the same address keep the recorded peer info
    /// and return `false`, but a link from a new connection is still kept
    /// so the peer stays reachable while any of its connections is open.
    pub fn register(&mut self, from: Address, info: HandshakeInfo, link: Option<PeerLink>) -> bool {
        if let Some(peer) = self.peers.get_mut(&from) {
            if let Some(link) = link {
                if !peer.links.iter().any(|l| l.same_channel(&link)) {
                    peer.links.push(link);
                }
            }
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.peers.insert(
            from,
            Peer {
                seq,
                host: info.host,
                port: info.port,
                public_key: info.public_key,
                links: link.into_iter().collect(),
            },
        );
        true
    }

    pub fn get(&self, address: &Address) -> Option<&Peer> {
        self.peers.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.peers.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers ordered by `seq`.
    pub fn snapshot(&self) -> Vec<(Address, Peer)> {
        let mut peers: Vec<_> = self
            .peers
            .iter()
            .map(|(a, p)| (a.clone(), p.clone()))
            .collect();
        peers.sort_by_key(|(_, p)| p.seq);
        peers
    }

    /// Addresses of peers with an open link, ordered by `seq`.
    pub fn connected(&self) -> Vec<Address> {
        self.snapshot()
            .into_iter()
            .filter(|(_, p)| p.is_connected())
            .map(|(a, _)| a)
            .collect()
    }

    /// Queues `envelope` on the peer's oldest open link. Returns `false` if
    /// the peer is unknown or all its links are gone.
    pub fn send(&self, to: &Address, envelope: Envelope) -> bool {
        match self.peers.get(to).and_then(Peer::open_link) {
            Some(link) => link.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Forgets closed links, then drops every peer left without one.
    /// Returns how many peers were removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, p| {
            p.links.retain(|l| !l.is_closed());
            !p.links.is_empty()
        });
        before - self.peers.len()
    }
}
