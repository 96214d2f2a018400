use super::consumer::EventHandler;
use super::producer::{Delivery, EventProducer};
use crate::domain::events::ScreeningRequest;
use crate::domain::rules::RuleEngine;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, warn};

/// Anti-fraud side of the saga: screens each request and publishes the verdict.
///
/// Holds no state besides its configuration.
#[derive(Clone)]
pub struct ScreeningAnalyzer {
    rules: RuleEngine,
    producer: EventProducer,
    result_topic: String,
}

impl ScreeningAnalyzer {
    pub fn new(rules: RuleEngine, producer: EventProducer, result_topic: impl Into<String>) -> Self {
        Self {
            rules,
            producer,
            result_topic: result_topic.into(),
        }
    }

    pub async fn analyze(&self, request: ScreeningRequest) -> Result<Delivery> {
        let result = self.rules.evaluate(&request);
        info!(
            transaction_id = %result.transaction_id,
            amount = %request.amount,
            is_fraudulent = result.is_fraudulent,
            "transaction screened"
        );
        let delivery = self.producer.publish(&self.result_topic, &result).await?;
        if delivery == Delivery::Dropped {
            warn!(transaction_id = %result.transaction_id, "screening result was not delivered");
        }
        Ok(delivery)
    }
}

#[async_trait]
impl EventHandler for ScreeningAnalyzer {
    type Event = ScreeningRequest;

    async fn handle(&self, event: ScreeningRequest) -> Result<()> {
        self.analyze(event).await.map(|_| ())
    }
}
