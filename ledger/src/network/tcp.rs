//! Framed TCP transport.
//!
//! Each connection carries length-prefixed JSON [`Envelope`]s. A connection
//! owns an unbounded outbound queue: the sending half becomes the peer's
//! [`PeerLink`](super::peer::PeerLink) once it shakes hands, and a writer
//! task drains the receiving half onto the socket. Both sides send a
//! handshake as soon as the connection is up.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::protocol::Node;
use crate::protocol::message::Envelope;

/// Largest frame a connection accepts unless configured otherwise. A sync
/// response carries the whole chain, so this sits well above the codec's
/// own 8 MiB default.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Binds the peer listener.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "peer listener bound");
    Ok(listener)
}

/// Accepts connections forever, serving each on its own task.
pub async fn serve(node: Arc<Node>, listener: TcpListener) -> io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        debug!(%remote, "inbound connection");
        let node = node.clone();
        tokio::spawn(async move {
            serve_connection(node, stream).await;
            debug!(%remote, "inbound connection closed");
        });
    }
}

/// Dials `addr` and serves the connection in the background.
pub async fn connect(node: Arc<Node>, addr: &str) -> io::Result<()> {
    let stream = TcpStream::connect(addr).await?;
    info!(peer = addr, "connected to peer");
    let addr = addr.to_string();
    tokio::spawn(async move {
        serve_connection(node, stream).await;
        debug!(peer = %addr, "outbound connection closed");
    });
    Ok(())
}

/// Runs one connection to completion: handshake, then read envelopes and
/// hand them to the node until the peer goes away.
///
/// Frames in either direction are limited to the node's
/// [`max_frame_length`](Node::max_frame_length).
pub async fn serve_connection(node: Arc<Node>, stream: TcpStream) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(node.max_frame_length())
        .new_codec();
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    match node.handshake_envelope() {
        Ok(hello) => {
            let _ = tx.send(hello);
        }
        Err(e) => {
            warn!(error = %e, "failed to build handshake");
            return;
        }
    }

    let writer = tokio::spawn(async move {
        while let Some(env) = rx.recv().await {
            let bytes = match serde_json::to_vec(&env) {
                Ok(b) => b,
                Err(e) => {
                    warn!(kind = %env.kind, error = %e, "failed to encode envelope");
                    continue;
                }
            };
            if let Err(e) = sink.send(Bytes::from(bytes)).await {
                debug!(error = %e, "write failed, closing connection");
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(env) => node.process(env, Some(tx.clone())).await,
                Err(e) => warn!(error = %e, "undecodable frame"),
            },
            Err(e) => {
                debug!(error = %e, "read failed, closing connection");
                break;
            }
        }
    }

    drop(tx);
    writer.abort();
    let _ = writer.await;
    node.prune_peers().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::identity::Identity;
    use crate::protocol::{NodeSettings, NoopObserver, StaticApprovalOracle};
    use crate::storage::{InMemoryStore, LedgerStore};
    use crate::consensus::Chain;
    use crate::testutil::{chain_with, contract_block, countersign, wallet};

    fn spawn_node(seed: u8) -> Arc<Node> {
        node_with(seed, chain_with(&[(&wallet(1), 10.0)]))
    }

    fn node_with(seed: u8, chain: Chain) -> Arc<Node> {
        Node::new(
            Arc::new(wallet(seed)),
            chain,
            LedgerStore::new(Arc::new(InMemoryStore::new())),
            Arc::new(StaticApprovalOracle::rejecting()),
            Arc::new(NoopObserver),
            NodeSettings::default(),
        )
    }

    async fn wait_for_peers(node: &Arc<Node>, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while node.peers().await.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peer count reached in time");
    }

    #[tokio::test]
    async fn nodes_exchange_handshakes_over_tcp() {
        let a = spawn_node(1);
        let b = spawn_node(2);

        let listener = bind("127.0.0.1:0".parse().expect("addr")).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(serve(a.clone(), listener));

        connect(b.clone(), &addr.to_string()).await.expect("connect");
        wait_for_peers(&a, 1).await;
        wait_for_peers(&b, 1).await;

        assert_eq!(a.peers().await[0].0, wallet(2).address());
        assert_eq!(b.peers().await[0].0, wallet(1).address());
        assert!(a.connected_validators().await.is_empty());
        assert_eq!(b.connected_validators().await, vec![wallet(1).address()]);

        server.abort();
    }

    #[tokio::test]
    async fn sync_response_beyond_codec_default_reaches_the_requester() {
        let (v0, p, c) = (wallet(1), wallet(2), wallet(4));
        let mut remote = chain_with(&[(&v0, 10.0)]);
        let id = "x".repeat(9 * 1024 * 1024);
        let block = countersign(contract_block(&remote, &p, &c, &id), &v0);
        remote.height = 1;
        remote.blocks.push(block);
        let encoded = serde_json::to_vec(&remote).expect("encode chain");
        assert!(encoded.len() > 8 * 1024 * 1024);

        let a = node_with(1, remote.clone());
        let b = spawn_node(2);
        let listener = bind("127.0.0.1:0".parse().expect("addr")).await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(serve(a.clone(), listener));

        connect(b.clone(), &addr.to_string()).await.expect("connect");
        wait_for_peers(&a, 1).await;
        wait_for_peers(&b, 1).await;

        b.send_sync_request(&v0.address()).await.expect("sync request");
        tokio::time::timeout(Duration::from_secs(30), async {
            while b.height().await != 1 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("sync response arrived in time");

        assert_eq!(b.chain().await, remote);
        // The connection survived the large frame.
        assert_eq!(a.peers().await.len(), 1);

        server.abort();
    }
}
