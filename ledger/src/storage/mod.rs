//! Storage backends for the ledger.
//!
//! The durable store is an external key-value store holding two named
//! records, written verbatim:
//!
//! - `"blocks"`: JSON array of every block, genesis first,
//! - `"validators"`: JSON array of the validator registry.
//!
//! This module provides the [`KeyValueStore`] abstraction, the
//! [`LedgerStore`] that maps ledger state onto those two records, and
//! concrete backends:
//!
//! - an in-memory store ([`mem::InMemoryStore`]) suitable for tests,
//! - a RocksDB-backed store ([`rocksdb::RocksDbStore`]) for persistent nodes.

pub mod mem;
pub mod rocksdb;

pub use mem::InMemoryStore;
pub use rocksdb::{RocksDbConfig, RocksDbStore};

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::consensus::Chain;
use crate::types::{Block, Validator};

/// Record name of the block sequence.
pub const BLOCKS_KEY: &str = "blocks";
/// Record name of the validator registry.
pub const VALIDATORS_KEY: &str = "validators";

/// Storage-level error type.
#[derive(Debug)]
pub enum StorageError {
    /// Underlying RocksDB error.
    RocksDb(::rocksdb::Error),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// A record could not be encoded or decoded.
    CorruptRecord {
        key: &'static str,
        source: serde_json::Error,
    },
}

impl From<::rocksdb::Error> for StorageError {
    fn from(e: ::rocksdb::Error) -> Self {
        StorageError::RocksDb(e)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::RocksDb(e) => write!(f, "rocksdb error: {e}"),
            StorageError::MissingColumnFamily(cf) => write!(f, "missing column family {cf}"),
            StorageError::CorruptRecord { key, source } => {
                write!(f, "corrupt record {key:?}: {source}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

/// Abstract key-value interface of the durable store.
///
/// The interface is intentionally small: the ledger only loads and
/// overwrites whole named records.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

/// Maps ledger state onto the `"blocks"` and `"validators"` records.
#[derive(Clone)]
pub struct LedgerStore {
    backend: Arc<dyn KeyValueStore>,
}

impl LedgerStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Loads persisted state, or writes and returns `genesis` if either
    /// record is absent.
    pub fn load_or_init(&self, genesis: Chain) -> Result<Chain, StorageError> {
        let blocks: Option<Vec<Block>> = self.load(BLOCKS_KEY)?;
        let validators: Option<Vec<Validator>> = self.load(VALIDATORS_KEY)?;

        match (blocks, validators) {
            (Some(blocks), Some(validators)) if !blocks.is_empty() => {
                let chain = Chain::from_parts(blocks, validators);
                info!(
                    height = chain.height,
                    validators = chain.validator_count(),
                    "loaded ledger from store"
                );
                Ok(chain)
            }
            _ => {
                info!("no persisted ledger, initialising from genesis");
                self.save_blocks(&genesis.blocks)?;
                self.save_validators(&genesis.validators)?;
                Ok(genesis)
            }
        }
    }

    pub fn save_blocks(&self, blocks: &[Block]) -> Result<(), StorageError> {
        self.save(BLOCKS_KEY, blocks)
    }

    pub fn save_validators(&self, validators: &[Validator]) -> Result<(), StorageError> {
        self.save(VALIDATORS_KEY, validators)
    }

    /// Rewrites both records.
    pub fn save_chain(&self, chain: &Chain) -> Result<(), StorageError> {
        self.save_blocks(&chain.blocks)?;
        self.save_validators(&chain.validators)
    }

    fn save<T: serde::Serialize + ?Sized>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|source| StorageError::CorruptRecord { key, source })?;
        self.backend.put(key, &bytes)
    }

    fn load<T: serde::de::DeserializeOwned>(
        &self,
        key: &'static str,
    ) -> Result<Option<T>, StorageError> {
        match self.backend.get(key)? {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StorageError::CorruptRecord { key, source }),
        }
    }
}
