#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use trx_saga::application::consumer::PipelineStats;
use trx_saga::domain::ports::{MessageBus, PartitionStreamBox, TransactionStore};
use trx_saga::domain::transaction::{NewTransaction, TransactionRecord, Transition};
use trx_saga::error::{Result, SagaError};
use trx_saga::infrastructure::in_memory::InMemoryTransactionStore;
use trx_saga::infrastructure::memory_bus::InMemoryBus;

pub fn request(amount: Decimal) -> NewTransaction {
    NewTransaction {
        debit_account_id: "acc-debit".to_string(),
        credit_account_id: "acc-credit".to_string(),
        type_code: "1".to_string(),
        amount,
    }
}

/// Waits until `stats` has seen at least `count` records.
pub async fn wait_for_seen(stats: &PipelineStats, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while stats.seen() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("pipeline did not process the expected records in time");
}

/// Bus that can be told to reject publishes to selected topics.
#[derive(Clone)]
pub struct FlakyBus {
    pub inner: InMemoryBus,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl FlakyBus {
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: InMemoryBus::new(partitions),
            failing: Arc::default(),
        }
    }

    pub async fn fail_topic(&self, topic: &str) {
        self.failing.write().await.insert(topic.to_string());
    }

    pub async fn heal_topic(&self, topic: &str) {
        self.failing.write().await.remove(topic);
    }
}

#[async_trait]
impl MessageBus for FlakyBus {
    async fn publish(&self, topic: &str, key: &str, value: &str) -> Result<()> {
        if self.failing.read().await.contains(topic) {
            return Err(SagaError::Transport(format!("{} is unavailable", topic)));
        }
        self.inner.publish(topic, key, value).await
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<PartitionStreamBox>> {
        self.inner.subscribe(topic, group).await
    }
}

/// Store whose writes can be switched off to simulate an unreachable database.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryTransactionStore,
    down: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(SagaError::Storage("database unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionStore for FlakyStore {
    async fn insert(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        self.check()?;
        self.inner.insert(record).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>> {
        self.check()?;
        self.inner.find_by_id(id).await
    }

    async fn save(&self, record: TransactionRecord) -> Result<TransactionRecord> {
        self.check()?;
        self.inner.save(record).await
    }

    async fn settle(&self, record: TransactionRecord) -> Result<Transition> {
        self.check()?;
        self.inner.settle(record).await
    }
}

pub fn generate_csv(path: &Path, amounts: &[&str]) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["debit_account_id", "credit_account_id", "type_code", "amount"])?;
    for (i, amount) in amounts.iter().enumerate() {
        let debit = format!("debit-{}", i);
        let credit = format!("credit-{}", i);
        wtr.write_record([debit.as_str(), credit.as_str(), "1", *amount])?;
    }

    wtr.flush()?;
    Ok(())
}
