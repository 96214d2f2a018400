use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use trx_saga::application::runtime::SagaRuntime;
use trx_saga::config::{DeliveryPolicy, PartitionKeyStrategy, SagaConfig, Topics};
use trx_saga::domain::ports::TransactionStoreRef;
use trx_saga::infrastructure::in_memory::InMemoryTransactionStore;
use trx_saga::infrastructure::memory_bus::InMemoryBus;
use trx_saga::interfaces::csv::record_writer::RecordWriter;
use trx_saga::interfaces::csv::transaction_reader::TransactionReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input CSV of transaction requests
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Largest amount screened as legitimate (inclusive)
    #[arg(long, env = "FRAUD_THRESHOLD", default_value = "1000")]
    fraud_threshold: Decimal,

    #[arg(long, env = "SCREENING_REQUEST_TOPIC", default_value = "screening-request")]
    request_topic: String,

    #[arg(long, env = "SCREENING_RESULT_TOPIC", default_value = "screening-result")]
    result_topic: String,

    /// Partitions per topic on the in-process bus
    #[arg(long, env = "BUS_PARTITIONS", default_value_t = 3)]
    partitions: u32,

    /// Upper bound for handling a single record, in milliseconds
    #[arg(long, env = "PROCESSING_TIMEOUT_MS", default_value_t = 5000)]
    processing_timeout_ms: u64,

    /// First delay before a withheld record is redelivered, in milliseconds
    #[arg(long, env = "REDELIVERY_BACKOFF_MS", default_value_t = 200)]
    redelivery_backoff_ms: u64,

    #[arg(long, value_enum, env = "DELIVERY_POLICY", default_value_t = DeliveryPolicy::AtMostOnce)]
    delivery_policy: DeliveryPolicy,

    #[arg(long, value_enum, env = "PARTITION_KEY", default_value_t = PartitionKeyStrategy::Random)]
    partition_key: PartitionKeyStrategy,

    /// Currency stamped on screening requests
    #[arg(long, env = "SETTLEMENT_CURRENCY", default_value = "PEN")]
    currency: String,

    /// How long to wait for every transaction to leave PENDING
    #[arg(long, default_value_t = 10)]
    settle_timeout_secs: u64,
}

impl Cli {
    fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            fraud_threshold: self.fraud_threshold,
            topics: Topics {
                screening_request: self.request_topic.clone(),
                screening_result: self.result_topic.clone(),
            },
            partitions: self.partitions,
            processing_timeout: Duration::from_millis(self.processing_timeout_ms),
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            max_redelivery_backoff: Duration::from_secs(10)
                .max(Duration::from_millis(self.redelivery_backoff_ms)),
            delivery_policy: self.delivery_policy,
            key_strategy: self.partition_key,
            currency: self.currency.clone(),
            ..SagaConfig::default()
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();
}

fn open_store(db_path: Option<PathBuf>) -> Result<TransactionStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = trx_saga::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryTransactionStore::new()))
        }
        None => Ok(Arc::new(InMemoryTransactionStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = cli.saga_config();
    config.validate().into_diagnostic()?;

    let bus = InMemoryBus::new(config.partitions);
    let store = open_store(cli.db_path.clone())?;
    let runtime = SagaRuntime::start(&config, Arc::new(bus.clone()), store)
        .await
        .into_diagnostic()?;

    // Submit every request; screening happens in the background
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = TransactionReader::new(file);
    let mut ids = Vec::new();
    for request in reader.transactions() {
        match request {
            Ok(request) => match runtime.transactions().create_transaction(request).await {
                Ok(created) => ids.push(created.transaction_external_id),
                Err(e) => error!(error = %e, "Error creating transaction"),
            },
            Err(e) => error!(error = %e, "Error reading transaction"),
        }
    }
    info!(submitted = ids.len(), "all transactions submitted");

    let views = runtime
        .wait_until_settled(&ids, Duration::from_secs(cli.settle_timeout_secs))
        .await
        .into_diagnostic()?;
    runtime.shutdown().await;
    bus.close().await;

    let stdout = io::stdout();
    let mut writer = RecordWriter::new(stdout.lock());
    writer.write_views(&views).into_diagnostic()?;

    Ok(())
}
