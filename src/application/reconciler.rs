use crate::domain::events::ScreeningResult;
use crate::domain::ports::TransactionStoreRef;
use crate::domain::transaction::{TransactionStatus, Transition};
use crate::error::{Result, SagaError};
use chrono::Utc;
use tracing::{info, warn};

/// Applies screening verdicts to stored transactions.
#[derive(Clone)]
pub struct StatusReconciler {
    store: TransactionStoreRef,
}

impl StatusReconciler {
    pub fn new(store: TransactionStoreRef) -> Self {
        Self { store }
    }

    /// Settles the record named by `result`.
    ///
    /// Unknown ids fail with [`SagaError::Conflict`]. A record that is already
    /// terminal is left as it is and the call succeeds, so redelivered results
    /// are harmless. The write goes through
    /// [`settle`](crate::domain::ports::TransactionStore::settle), so
    /// two verdicts racing on the same id settle it exactly once.
    pub async fn reconcile(&self, result: &ScreeningResult) -> Result<Transition> {
        let mut record = self
            .store
            .find_by_id(&result.transaction_id)
            .await?
            .ok_or_else(|| SagaError::Conflict(result.transaction_id.clone()))?;

        let transition = match record.apply_verdict(result.is_fraudulent, Utc::now()) {
            // Another delivery may have settled the record since it was read
            Transition::Settled(_) => self.store.settle(record).await?,
            already => already,
        };
        match transition {
            Transition::Settled(status) => {
                info!(
                    transaction_id = %result.transaction_id,
                    status = %status,
                    reason = result.reason.as_deref().unwrap_or(""),
                    "transaction settled"
                );
            }
            Transition::AlreadySettled(status) => {
                if status != TransactionStatus::from_verdict(result.is_fraudulent) {
                    warn!(
                        transaction_id = %result.transaction_id,
                        status = %status,
                        "conflicting verdict for settled transaction ignored"
                    );
                } else {
                    info!(
                        transaction_id = %result.transaction_id,
                        status = %status,
                        "duplicate verdict ignored"
                    );
                }
            }
        }
        Ok(transition)
    }
}
