use super::consumer::EventHandler;
use super::producer::{Delivery, EventProducer};
use super::reconciler::StatusReconciler;
use crate::domain::events::{ScreeningRequest, ScreeningResult};
use crate::domain::ports::TransactionStoreRef;
use crate::domain::transaction::{NewTransaction, TransactionRecord, TransactionStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreated {
    pub transaction_external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionTypeView {
    pub code: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionStatusView {
    pub name: TransactionStatus,
}

/// Read model returned by [`TransactionService::get_transaction`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub transaction_external_id: String,
    pub transaction_type: TransactionTypeView,
    pub amount: Decimal,
    pub transaction_status: TransactionStatusView,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Transaction side of the saga: create and query.
#[derive(Clone)]
pub struct TransactionService {
    store: TransactionStoreRef,
    producer: EventProducer,
    request_topic: String,
    currency: String,
    transaction_types: BTreeMap<String, String>,
}

impl TransactionService {
    pub fn new(
        store: TransactionStoreRef,
        producer: EventProducer,
        request_topic: impl Into<String>,
        currency: impl Into<String>,
        transaction_types: BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            producer,
            request_topic: request_topic.into(),
            currency: currency.into(),
            transaction_types,
        }
    }

    /// Persists a PENDING record, then asks for it to be screened.
    ///
    /// Once the record is stored the call succeeds, whether or not the
    /// screening request reached the bus.
    pub async fn create_transaction(&self, request: NewTransaction) -> Result<TransactionCreated> {
        let id = Uuid::new_v4().to_string();
        let record = TransactionRecord::pending(id, request, Utc::now())?;
        let record = self.store.insert(record).await.inspect_err(|err| {
            error!(error = %err, "Error saving transaction");
        })?;
        info!(transaction_id = %record.id, amount = %record.amount(), "transaction created");

        let screening = ScreeningRequest {
            id: record.id.clone(),
            amount: record.amount(),
            currency: Some(self.currency.clone()),
        };
        match self.producer.publish(&self.request_topic, &screening).await {
            Ok(Delivery::Sent { .. }) => {}
            Ok(Delivery::Dropped) => {
                error!(transaction_id = %record.id, "screening request was not delivered");
            }
            Err(err) => {
                error!(transaction_id = %record.id, error = %err, "Error sending screening request");
            }
        }

        Ok(TransactionCreated {
            transaction_external_id: record.id,
        })
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<TransactionView>> {
        let record = self.store.find_by_id(id).await.inspect_err(|err| {
            error!(transaction_id = id, error = %err, "Error obtaining transaction");
        })?;
        Ok(record.map(|record| self.view(record)))
    }

    fn view(&self, record: TransactionRecord) -> TransactionView {
        TransactionView {
            transaction_type: TransactionTypeView {
                name: self.transaction_types.get(&record.type_code).cloned(),
                code: record.type_code.clone(),
            },
            amount: record.amount(),
            transaction_status: TransactionStatusView {
                name: record.status(),
            },
            created_at: record.created_at,
            updated_at: record.updated_at(),
            transaction_external_id: record.id,
        }
    }
}

/// Consumes screening results and reconciles the matching record.
#[derive(Clone)]
pub struct ScreeningResultHandler {
    reconciler: StatusReconciler,
}

impl ScreeningResultHandler {
    pub fn new(reconciler: StatusReconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl EventHandler for ScreeningResultHandler {
    type Event = ScreeningResult;

    async fn handle(&self, event: ScreeningResult) -> Result<()> {
        self.reconciler.reconcile(&event).await.map(|_| ())
    }
}
