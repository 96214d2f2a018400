use super::anti_fraud::ScreeningAnalyzer;
use super::consumer::{ConsumerHandle, ConsumerPipeline, PipelineStats, RecordFailure};
use super::producer::EventProducer;
use super::reconciler::StatusReconciler;
use super::transactions::{ScreeningResultHandler, TransactionService, TransactionView};
use crate::config::SagaConfig;
use crate::domain::ports::{MessageBusRef, TransactionStoreRef};
use crate::domain::rules::RuleEngine;
use crate::domain::transaction::TransactionStatus;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

type FailureSink = Option<mpsc::UnboundedSender<RecordFailure>>;

/// Starts the anti-fraud service: consumes screening requests, publishes verdicts.
pub async fn start_anti_fraud_service(
    config: &SagaConfig,
    bus: MessageBusRef,
    failures: FailureSink,
) -> Result<ConsumerHandle> {
    let producer = EventProducer::new(Arc::clone(&bus), config.delivery_policy, config.key_strategy);
    let analyzer = ScreeningAnalyzer::new(
        RuleEngine::new(config.fraud_threshold),
        producer,
        config.topics.screening_result.clone(),
    );
    let mut pipeline = ConsumerPipeline::new(
        config.topics.screening_request.clone(),
        config.groups.anti_fraud.clone(),
        analyzer,
    )
    .with_timeout(config.processing_timeout)
    .with_redelivery_backoff(config.redelivery_backoff, config.max_redelivery_backoff);
    if let Some(failures) = failures {
        pipeline = pipeline.with_failure_channel(failures);
    }
    pipeline.start(bus.as_ref()).await
}

/// Starts the transaction service: the create/query façade plus the consumer
/// that reconciles screening results.
pub async fn start_transaction_service(
    config: &SagaConfig,
    bus: MessageBusRef,
    store: TransactionStoreRef,
    failures: FailureSink,
) -> Result<(TransactionService, ConsumerHandle)> {
    let producer = EventProducer::new(Arc::clone(&bus), config.delivery_policy, config.key_strategy);
    let service = TransactionService::new(
        Arc::clone(&store),
        producer,
        config.topics.screening_request.clone(),
        config.currency.clone(),
        config.transaction_types.clone(),
    );
    let handler = ScreeningResultHandler::new(StatusReconciler::new(store));
    let mut pipeline = ConsumerPipeline::new(
        config.topics.screening_result.clone(),
        config.groups.transaction.clone(),
        handler,
    )
    .with_timeout(config.processing_timeout)
    .with_redelivery_backoff(config.redelivery_backoff, config.max_redelivery_backoff);
    if let Some(failures) = failures {
        pipeline = pipeline.with_failure_channel(failures);
    }
    let consumer = pipeline.start(bus.as_ref()).await?;
    Ok((service, consumer))
}

/// Both services running side by side on one bus.
pub struct SagaRuntime {
    transactions: TransactionService,
    anti_fraud: ConsumerHandle,
    reconciliation: ConsumerHandle,
}

impl SagaRuntime {
    pub async fn start(
        config: &SagaConfig,
        bus: MessageBusRef,
        store: TransactionStoreRef,
    ) -> Result<Self> {
        Self::start_with_failures(config, bus, store, None).await
    }

    /// Like [`SagaRuntime::start`], forwarding record failures of both
    /// consumers to `failures`.
    pub async fn start_with_failures(
        config: &SagaConfig,
        bus: MessageBusRef,
        store: TransactionStoreRef,
        failures: FailureSink,
    ) -> Result<Self> {
        config.validate()?;
        let anti_fraud = start_anti_fraud_service(config, Arc::clone(&bus), failures.clone()).await?;
        let (transactions, reconciliation) =
            start_transaction_service(config, bus, store, failures).await?;
        info!(threshold = %config.fraud_threshold, "saga runtime started");
        Ok(Self {
            transactions,
            anti_fraud,
            reconciliation,
        })
    }

    pub fn transactions(&self) -> &TransactionService {
        &self.transactions
    }

    pub fn anti_fraud_stats(&self) -> Arc<PipelineStats> {
        self.anti_fraud.stats()
    }

    pub fn reconciliation_stats(&self) -> Arc<PipelineStats> {
        self.reconciliation.stats()
    }

    /// Polls until every listed transaction has left PENDING or `timeout`
    /// elapses, and returns the last views read. Unknown ids are omitted.
    pub async fn wait_until_settled(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<Vec<TransactionView>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut views = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(view) = self.transactions.get_transaction(id).await? {
                    views.push(view);
                }
            }
            let pending = views
                .iter()
                .filter(|view| view.transaction_status.name == TransactionStatus::Pending)
                .count();
            if pending == 0 {
                return Ok(views);
            }
            if Instant::now() >= deadline {
                warn!(pending, "transactions still pending after settle timeout");
                return Ok(views);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.anti_fraud.shutdown().await;
        self.reconciliation.shutdown().await;
    }
}
