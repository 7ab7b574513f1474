//! RocksDB-backed key-value store.
//!
//! Records are kept in a dedicated `"ledger"` column family keyed by their
//! record name (`"blocks"`, `"validators"`).

use std::{path::Path, sync::Arc};

use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DB, Options};

use super::{KeyValueStore, StorageError};

const LEDGER_CF: &str = "ledger";

/// Configuration for [`RocksDbStore`].
#[derive(Clone, Debug)]
pub struct RocksDbConfig {
    /// Filesystem path to the RocksDB database directory.
    pub path: String,
    /// Whether to create the database and missing column families if they
    /// do not yet exist.
    pub create_if_missing: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger-db".to_string(),
            create_if_missing: true,
        }
    }
}

/// RocksDB-backed implementation of [`KeyValueStore`].
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    /// Opens (or creates) a RocksDB-backed store at the configured path.
    ///
    /// The `"default"` column family is also created to keep RocksDB happy,
    /// but it is not used.
    pub fn open(cfg: &RocksDbConfig) -> Result<Self, StorageError> {
        let path = Path::new(&cfg.path);

        let mut opts = Options::default();
        opts.create_if_missing(cfg.create_if_missing);
        opts.create_missing_column_families(cfg.create_if_missing);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(LEDGER_CF, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db })
    }

    fn cf_ledger(&self) -> Result<Arc<BoundColumnFamily<'_>>, StorageError> {
        self.db
            .cf_handle(LEDGER_CF)
            .ok_or(StorageError::MissingColumnFamily(LEDGER_CF))
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf_ledger()?;
        Ok(self.db.get_cf(&cf, key.as_bytes())?)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf_ledger()?;
        self.db.put_cf(&cf, key.as_bytes(), value)?;
        Ok(())
    }
}
