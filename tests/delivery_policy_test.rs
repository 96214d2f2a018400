use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use trx_saga::application::runtime::SagaRuntime;
use trx_saga::config::{DeliveryPolicy, SagaConfig};
use trx_saga::domain::transaction::TransactionStatus;
use trx_saga::error::SagaError;
use trx_saga::infrastructure::in_memory::InMemoryTransactionStore;

mod common;

use common::FlakyBus;

fn single_partition(policy: DeliveryPolicy) -> SagaConfig {
    SagaConfig {
        partitions: 1,
        delivery_policy: policy,
        ..SagaConfig::default()
    }
}

#[tokio::test]
async fn test_create_succeeds_when_request_cannot_be_published() {
    for policy in [DeliveryPolicy::AtMostOnce, DeliveryPolicy::Propagate] {
        let config = single_partition(policy);
        let bus = FlakyBus::new(config.partitions);
        bus.fail_topic(&config.topics.screening_request).await;
        let runtime = SagaRuntime::start(
            &config,
            Arc::new(bus.clone()),
            Arc::new(InMemoryTransactionStore::new()),
        )
        .await
        .unwrap();

        let created = runtime
            .transactions()
            .create_transaction(common::request(dec!(100)))
            .await
            .unwrap();

        let views = runtime
            .wait_until_settled(&[created.transaction_external_id], Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].transaction_status.name, TransactionStatus::Pending);
        assert!(views[0].updated_at.is_none());
        assert!(bus.inner.records(&config.topics.screening_request).await.is_empty());
        runtime.shutdown().await;
    }
}

#[tokio::test]
async fn test_at_most_once_drops_verdict_and_commits_request() {
    let config = single_partition(DeliveryPolicy::AtMostOnce);
    let bus = FlakyBus::new(config.partitions);
    bus.fail_topic(&config.topics.screening_result).await;
    let runtime = SagaRuntime::start(
        &config,
        Arc::new(bus.clone()),
        Arc::new(InMemoryTransactionStore::new()),
    )
    .await
    .unwrap();

    let created = runtime
        .transactions()
        .create_transaction(common::request(dec!(100)))
        .await
        .unwrap();

    let stats = runtime.anti_fraud_stats();
    common::wait_for_seen(&stats, 1).await;
    assert_eq!(stats.handled(), 1);
    assert_eq!(stats.failed(), 0);
    assert_eq!(
        bus.inner
            .committed_offset(&config.topics.screening_request, &config.groups.anti_fraud, 0)
            .await,
        1
    );
    assert!(bus.inner.records(&config.topics.screening_result).await.is_empty());

    // The verdict is lost, so the record never settles
    let view = runtime
        .transactions()
        .get_transaction(&created.transaction_external_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.transaction_status.name, TransactionStatus::Pending);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_propagate_withholds_commit_until_verdict_is_sent() {
    let config = SagaConfig {
        redelivery_backoff: Duration::from_millis(20),
        max_redelivery_backoff: Duration::from_millis(100),
        ..single_partition(DeliveryPolicy::Propagate)
    };
    let bus = FlakyBus::new(config.partitions);
    bus.fail_topic(&config.topics.screening_result).await;

    let (tx, mut failures) = mpsc::unbounded_channel();
    let runtime = SagaRuntime::start_with_failures(
        &config,
        Arc::new(bus.clone()),
        Arc::new(InMemoryTransactionStore::new()),
        Some(tx),
    )
    .await
    .unwrap();

    let created = runtime
        .transactions()
        .create_transaction(common::request(dec!(2500)))
        .await
        .unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.topic, config.topics.screening_request);
    assert_eq!(failure.offset, 0);
    assert!(matches!(failure.error, SagaError::Transport(_)));
    assert_eq!(
        bus.inner
            .committed_offset(&config.topics.screening_request, &config.groups.anti_fraud, 0)
            .await,
        0
    );

    // Once the broker recovers, the running service redelivers the request
    bus.heal_topic(&config.topics.screening_result).await;

    let views = runtime
        .wait_until_settled(&[created.transaction_external_id], Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(views[0].transaction_status.name, TransactionStatus::Rejected);
    tokio::time::timeout(Duration::from_secs(5), async {
        while bus
            .inner
            .committed_offset(&config.topics.screening_request, &config.groups.anti_fraud, 0)
            .await
            < 1
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request offset was never committed");
    runtime.shutdown().await;
}
