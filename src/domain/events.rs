//! Wire events exchanged over the bus.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Anything that refers to a single transaction.
pub trait Correlated {
    fn transaction_id(&self) -> &str;
}

/// Asks the anti-fraud service to classify a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRequest {
    pub id: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Correlated for ScreeningRequest {
    fn transaction_id(&self) -> &str {
        &self.id
    }
}

/// Verdict for a previously requested screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningResult {
    pub transaction_id: String,
    pub is_fraudulent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Correlated for ScreeningResult {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }
}
