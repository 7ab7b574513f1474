//! Node startup: wires storage, the protocol node, the transport and the
//! driver together from a [`NodeConfig`].

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::consensus::Chain;
use crate::identity::{Identity, IdentityError, Wallet};
use crate::network::tcp;
use crate::protocol::{LedgerObserver, Node, NodeSettings, RandomApprovalOracle, run_driver};
use crate::storage::{LedgerStore, RocksDbStore, StorageError};
use crate::types::Validator;

#[derive(Debug)]
pub enum StartError {
    Identity(IdentityError),
    Storage(StorageError),
    Bind(io::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Identity(e) => write!(f, "invalid secret key: {e}"),
            StartError::Storage(e) => write!(f, "failed to open ledger store: {e}"),
            StartError::Bind(e) => write!(f, "failed to bind peer listener: {e}"),
        }
    }
}

impl std::error::Error for StartError {}

/// The configured wallet, or a freshly generated one.
pub fn load_identity(cfg: &NodeConfig) -> Result<Wallet, StartError> {
    match &cfg.secret_key {
        Some(hex) => Wallet::from_secret_hex(hex).map_err(StartError::Identity),
        None => {
            let wallet = Wallet::generate();
            warn!(address = %wallet.address(), "no secret key configured, generated a new one");
            Ok(wallet)
        }
    }
}

/// The chain a brand-new network starts from.
///
/// Every node of a network must agree on the genesis validator, so it comes
/// from configuration; only a single bootstrap node may default to itself.
pub fn genesis_chain(cfg: &NodeConfig, identity: &dyn Identity) -> Chain {
    let genesis = &cfg.consensus.genesis;
    let address = genesis.validator.clone().unwrap_or_else(|| identity.address());
    Chain::genesis(Validator::genesis(
        address,
        genesis.reputation,
        genesis.energy_capacity,
        genesis.energy_rate,
    ))
}

/// Starts a node: opens the store, loads or initialises the ledger, binds
/// the peer listener, dials bootstrap peers and spawns the driver.
pub async fn start_node(
    cfg: &NodeConfig,
    identity: Arc<dyn Identity>,
    observer: Arc<dyn LedgerObserver>,
) -> Result<Arc<Node>, StartError> {
    let backend = RocksDbStore::open(&cfg.storage).map_err(StartError::Storage)?;
    let store = LedgerStore::new(Arc::new(backend));
    let chain = store
        .load_or_init(genesis_chain(cfg, identity.as_ref()))
        .map_err(StartError::Storage)?;

    let settings = NodeSettings {
        host: cfg.network.advertised_host.clone(),
        port: cfg.network.listen_addr.port(),
        max_frame_length: cfg.network.max_frame_length,
        admission: cfg.admission.clone(),
    };
    let oracle = Arc::new(RandomApprovalOracle::new(cfg.admission.clone()));
    let node = Node::new(identity, chain, store, oracle, observer, settings);
    info!(address = %node.address(), height = node.height().await, "node initialised");

    let listener = tcp::bind(cfg.network.listen_addr)
        .await
        .map_err(StartError::Bind)?;
    let server = node.clone();
    tokio::spawn(async move {
        if let Err(e) = tcp::serve(server, listener).await {
            warn!(error = %e, "peer listener stopped");
        }
    });

    for peer in &cfg.network.bootstrap {
        if let Err(e) = tcp::connect(node.clone(), peer).await {
            warn!(peer = %peer, error = %e, "failed to dial bootstrap peer");
        }
    }

    if cfg.driver.enabled {
        tokio::spawn(run_driver(node.clone(), cfg.driver.clone()));
    }

    Ok(node)
}
