use super::transaction::{TransactionRecord, Transition};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persists a newly created record.
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord>;
    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>>;
    /// Overwrites an existing record.
    async fn save(&self, record: TransactionRecord) -> Result<TransactionRecord>;
    /// Writes a settled record only if the stored copy is still PENDING.
    ///
    /// The check and the write are atomic with respect to other calls on the
    /// same store. A stored record that is already terminal is left as it is
    /// and reported as [`Transition::AlreadySettled`].
    async fn settle(&self, record: TransactionRecord) -> Result<Transition>;
}

/// A record delivered by the bus to a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: String,
}

/// Ordered stream over one partition of a topic for one consumer group.
#[async_trait]
pub trait PartitionStream: Send {
    fn partition(&self) -> u32;

    /// Waits for the next record. `None` means the bus has shut down.
    async fn next(&mut self) -> Option<InboundRecord>;

    /// Marks `record` as processed for this stream's consumer group.
    async fn commit(&mut self, record: &InboundRecord) -> Result<()>;

    /// Moves the stream back to the group's committed cursor, so every
    /// record from the first uncommitted one onwards is delivered again.
    /// Returns the offset the stream now reads from.
    async fn rewind(&mut self) -> Result<u64>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: &str) -> Result<()>;

    /// Opens one stream per partition of `topic`, each resuming at the
    /// group's committed cursor.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<PartitionStreamBox>>;
}

pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type MessageBusRef = Arc<dyn MessageBus>;
pub type PartitionStreamBox = Box<dyn PartitionStream>;
