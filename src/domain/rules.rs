use super::events::{ScreeningRequest, ScreeningResult};
use rust_decimal::Decimal;

pub const AMOUNT_EXCEEDED_REASON: &str = "Transaction amount exceeds the maximum allowed amount";

/// Stateless fraud classifier.
///
/// Holds only its threshold, so a single instance can be shared by every
/// consumer worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleEngine {
    maximum_amount: Decimal,
}

impl RuleEngine {
    pub fn new(maximum_amount: Decimal) -> Self {
        Self { maximum_amount }
    }

    pub fn evaluate(&self, request: &ScreeningRequest) -> ScreeningResult {
        // Inclusive: an amount equal to the threshold is legitimate
        if request.amount <= self.maximum_amount {
            ScreeningResult {
                transaction_id: request.id.clone(),
                is_fraudulent: false,
                reason: None,
            }
        } else {
            ScreeningResult {
                transaction_id: request.id.clone(),
                is_fraudulent: true,
                reason: Some(AMOUNT_EXCEEDED_REASON.to_string()),
            }
        }
    }
}
