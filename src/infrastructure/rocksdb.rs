use crate::domain::ports::TransactionStore;
use crate::domain::transaction::{TransactionRecord, Transition};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family holding transaction records keyed by id.
pub const CF_TRANSACTIONS: &str = "transactions";

/// A persistent transaction store backed by RocksDB.
///
/// Records are stored as JSON under their id in a dedicated column family.
/// `Clone` shares the underlying `Arc<DB>`. Read-check-write sequences
/// (`insert`, `save`, `settle`) are serialized through `writes`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions])?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    fn read(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let cf = self.cf()?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| {
                    SagaError::Storage(format!("corrupt record {}: {}", id, e))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write(&self, record: &TransactionRecord) -> Result<()> {
        let cf = self.cf()?;
        let value = serde_json::to_vec(record)
            .map_err(|e| SagaError::Storage(format!("serialization error: {}", e)))?;
        self.db.put_cf(&cf, record.id.as_bytes(), value)?;
        Ok(())
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_TRANSACTIONS).ok_or_else(|| {
            SagaError::Storage("transactions column family not found".to_string())
        })
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let _guard = self.writes.lock().await;
        let cf = self.cf()?;
        // Only checks for the key, without reading the value
        if self.db.get_pinned_cf(&cf, record.id.as_bytes())?.is_some() {
            return Err(SagaError::Storage(format!(
                "transaction {} already exists",
                record.id
            )));
        }
        self.write(&record)?;
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>> {
        self.read(id)
    }

    async fn save(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let _guard = self.writes.lock().await;
        if self.read(&record.id)?.is_none() {
            return Err(SagaError::Storage(format!(
                "transaction {} does not exist",
                record.id
            )));
        }
        self.write(&record)?;
        Ok(record)
    }

    async fn settle(&self, record: TransactionRecord) -> Result<Transition> {
        let _guard = self.writes.lock().await;
        let stored = self.read(&record.id)?.ok_or_else(|| {
            SagaError::Storage(format!("transaction {} does not exist", record.id))
        })?;
        if stored.status().is_terminal() {
            return Ok(Transition::AlreadySettled(stored.status()));
        }
        self.write(&record)?;
        Ok(Transition::Settled(record.status()))
    }
}
