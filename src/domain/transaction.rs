use crate::error::SagaError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A strictly positive transaction amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, SagaError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(SagaError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Terminal status implied by a screening verdict.
    pub fn from_verdict(is_fraudulent: bool) -> Self {
        if is_fraudulent {
            TransactionStatus::Rejected
        } else {
            TransactionStatus::Approved
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying a verdict to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record left PENDING and now holds this status.
    Settled(TransactionStatus),
    /// The record was already terminal and was left untouched.
    AlreadySettled(TransactionStatus),
}

/// Request accepted by the create path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTransaction {
    pub debit_account_id: String,
    pub credit_account_id: String,
    pub type_code: String,
    pub amount: Decimal,
}

/// A transaction as persisted by the transaction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub debit_account_id: String,
    pub credit_account_id: String,
    pub type_code: String,
    amount: Amount,
    status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// Builds a fresh PENDING record.
    pub fn pending(id: String, request: NewTransaction, now: DateTime<Utc>) -> Result<Self, SagaError> {
        let amount = Amount::new(request.amount)?;
        Ok(Self {
            id,
            debit_account_id: request.debit_account_id,
            credit_account_id: request.credit_account_id,
            type_code: request.type_code,
            amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: None,
        })
    }

    pub fn amount(&self) -> Decimal {
        self.amount.value()
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Moves the record out of PENDING according to the verdict.
    ///
    /// A record that is already terminal is never re-mutated, whatever the
    /// verdict says.
    pub fn apply_verdict(&mut self, is_fraudulent: bool, now: DateTime<Utc>) -> Transition {
        if self.status.is_terminal() {
            return Transition::AlreadySettled(self.status);
        }
        self.status = TransactionStatus::from_verdict(is_fraudulent);
        self.updated_at = Some(now);
        Transition::Settled(self.status)
    }
}
