use crate::domain::ports::TransactionStore;
use crate::domain::transaction::{TransactionRecord, Transition};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for transaction records.
///
/// Uses `Arc<RwLock<HashMap<String, TransactionRecord>>>` so clones share the
/// same rows. Suitable for tests and single-process runs.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    records: Arc<RwLock<HashMap<String, TransactionRecord>>>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(SagaError::Storage(format!(
                "transaction {} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn save(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(SagaError::Storage(format!(
                "transaction {} does not exist",
                record.id
            ))),
        }
    }

    async fn settle(&self, record: TransactionRecord) -> Result<Transition> {
        let mut records = self.records.write().await;
        let existing = records.get_mut(&record.id).ok_or_else(|| {
            SagaError::Storage(format!("transaction {} does not exist", record.id))
        })?;
        if existing.status().is_terminal() {
            return Ok(Transition::AlreadySettled(existing.status()));
        }
        let status = record.status();
        *existing = record;
        Ok(Transition::Settled(status))
    }
}
