//! Runtime configuration shared by both services.
//!
//! Everything the saga needs at runtime (threshold, topic names, delivery
//! policy) is carried in an explicit [`SagaConfig`] handed to each component
//! at construction time.

use crate::error::{Result, SagaError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::time::Duration;

/// What the producer does when the bus rejects a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeliveryPolicy {
    /// Log the failure and report the send as a no-op success.
    #[default]
    AtMostOnce,
    /// Return the transport error to the caller.
    Propagate,
}

/// How outbound records are keyed for partition routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PartitionKeyStrategy {
    /// A fresh UUID per send.
    #[default]
    Random,
    /// The transaction id the event refers to.
    TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub screening_request: String,
    pub screening_result: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            screening_request: "screening-request".to_string(),
            screening_result: "screening-result".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroups {
    pub transaction: String,
    pub anti_fraud: String,
}

impl Default for ConsumerGroups {
    fn default() -> Self {
        Self {
            transaction: "transaction-service".to_string(),
            anti_fraud: "anti-fraud-service".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Largest amount that still screens as legitimate (inclusive).
    pub fraud_threshold: Decimal,
    pub topics: Topics,
    pub groups: ConsumerGroups,
    /// Partition count used when a topic is first created on the bus.
    pub partitions: u32,
    /// Upper bound on the act + publish steps of a single record.
    pub processing_timeout: Duration,
    /// First delay before a partition redelivers a withheld record.
    pub redelivery_backoff: Duration,
    /// Ceiling the redelivery delay doubles up to.
    pub max_redelivery_backoff: Duration,
    pub delivery_policy: DeliveryPolicy,
    pub key_strategy: PartitionKeyStrategy,
    /// Currency stamped on outgoing screening requests.
    pub currency: String,
    /// Transaction type catalog: code -> display name.
    pub transaction_types: BTreeMap<String, String>,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            fraud_threshold: dec!(1000),
            topics: Topics::default(),
            groups: ConsumerGroups::default(),
            partitions: 3,
            processing_timeout: Duration::from_secs(5),
            redelivery_backoff: Duration::from_millis(200),
            max_redelivery_backoff: Duration::from_secs(10),
            delivery_policy: DeliveryPolicy::default(),
            key_strategy: PartitionKeyStrategy::default(),
            currency: "PEN".to_string(),
            transaction_types: default_transaction_types(),
        }
    }
}

fn default_transaction_types() -> BTreeMap<String, String> {
    [
        ("1", "Transfer between own accounts"),
        ("2", "Transfer to third parties"),
        ("3", "Interbank transfer"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

impl SagaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fraud_threshold.is_sign_negative() {
            return Err(SagaError::Config(
                "fraud threshold must not be negative".to_string(),
            ));
        }
        if self.partitions == 0 {
            return Err(SagaError::Config(
                "partition count must be at least 1".to_string(),
            ));
        }
        if self.topics.screening_request.trim().is_empty()
            || self.topics.screening_result.trim().is_empty()
        {
            return Err(SagaError::Config("topic names must not be empty".to_string()));
        }
        if self.topics.screening_request == self.topics.screening_result {
            return Err(SagaError::Config(
                "request and result topics must differ".to_string(),
            ));
        }
        if self.processing_timeout.is_zero() {
            return Err(SagaError::Config(
                "processing timeout must be greater than zero".to_string(),
            ));
        }
        if self.redelivery_backoff.is_zero() {
            return Err(SagaError::Config(
                "redelivery backoff must be greater than zero".to_string(),
            ));
        }
        if self.max_redelivery_backoff < self.redelivery_backoff {
            return Err(SagaError::Config(
                "maximum redelivery backoff must not be below the initial one".to_string(),
            ));
        }
        Ok(())
    }
}
