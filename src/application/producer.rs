use crate::config::{DeliveryPolicy, PartitionKeyStrategy};
use crate::domain::events::Correlated;
use crate::domain::ports::MessageBusRef;
use crate::error::{Result, SagaError};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

/// What happened to an outbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { key: String },
    /// The bus rejected the send and the policy chose to drop the event.
    Dropped,
}

/// Publishes events to the bus under a fixed [`DeliveryPolicy`].
#[derive(Clone)]
pub struct EventProducer {
    bus: MessageBusRef,
    policy: DeliveryPolicy,
    keys: PartitionKeyStrategy,
}

impl EventProducer {
    pub fn new(bus: MessageBusRef, policy: DeliveryPolicy, keys: PartitionKeyStrategy) -> Self {
        Self { bus, policy, keys }
    }

    /// Serializes `event` and sends it to `topic`.
    ///
    /// Under [`DeliveryPolicy::AtMostOnce`] a transport failure is logged and
    /// reported as [`Delivery::Dropped`]; nothing is retried. Under
    /// [`DeliveryPolicy::Propagate`] the transport error is returned.
    pub async fn publish<E>(&self, topic: &str, event: &E) -> Result<Delivery>
    where
        E: Serialize + Correlated + Sync,
    {
        let payload = serde_json::to_string(event).map_err(SagaError::Encode)?;
        let key = match self.keys {
            PartitionKeyStrategy::Random => Uuid::new_v4().to_string(),
            PartitionKeyStrategy::TransactionId => event.transaction_id().to_string(),
        };

        match self.bus.publish(topic, &key, &payload).await {
            Ok(()) => {
                debug!(topic, key = %key, transaction_id = event.transaction_id(), "event published");
                Ok(Delivery::Sent { key })
            }
            Err(err) => match self.policy {
                DeliveryPolicy::AtMostOnce => {
                    error!(
                        topic,
                        transaction_id = event.transaction_id(),
                        error = %err,
                        "Error sending message, event dropped"
                    );
                    Ok(Delivery::Dropped)
                }
                DeliveryPolicy::Propagate => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ScreeningResult;
    use crate::domain::ports::{MessageBus, PartitionStreamBox};
    use crate::infrastructure::memory_bus::InMemoryBus;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct DownBus;

    #[async_trait]
    impl MessageBus for DownBus {
        async fn publish(&self, _topic: &str, _key: &str, _value: &str) -> Result<()> {
            Err(SagaError::Transport("broker unreachable".to_string()))
        }

        async fn subscribe(&self, _topic: &str, _group: &str) -> Result<Vec<PartitionStreamBox>> {
            Ok(Vec::new())
        }
    }

    fn result(id: &str) -> ScreeningResult {
        ScreeningResult {
            transaction_id: id.to_string(),
            is_fraudulent: false,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_random_keys_differ_per_send() {
        let bus = InMemoryBus::new(2);
        let producer = EventProducer::new(
            Arc::new(bus.clone()),
            DeliveryPolicy::AtMostOnce,
            PartitionKeyStrategy::Random,
        );

        let first = producer.publish("results", &result("t-1")).await.unwrap();
        let second = producer.publish("results", &result("t-1")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(bus.records("results").await.len(), 2);
    }

    #[tokio::test]
    async fn test_transaction_id_keys() {
        let bus = InMemoryBus::new(2);
        let producer = EventProducer::new(
            Arc::new(bus.clone()),
            DeliveryPolicy::AtMostOnce,
            PartitionKeyStrategy::TransactionId,
        );

        let delivery = producer.publish("results", &result("t-7")).await.unwrap();
        assert_eq!(
            delivery,
            Delivery::Sent {
                key: "t-7".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_at_most_once_swallows_transport_errors() {
        let producer = EventProducer::new(
            Arc::new(DownBus),
            DeliveryPolicy::AtMostOnce,
            PartitionKeyStrategy::Random,
        );
        let delivery = producer.publish("results", &result("t-1")).await.unwrap();
        assert_eq!(delivery, Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_propagate_returns_transport_errors() {
        let producer = EventProducer::new(
            Arc::new(DownBus),
            DeliveryPolicy::Propagate,
            PartitionKeyStrategy::Random,
        );
        let outcome = producer.publish("results", &result("t-1")).await;
        assert!(matches!(outcome, Err(SagaError::Transport(_))));
    }
}
