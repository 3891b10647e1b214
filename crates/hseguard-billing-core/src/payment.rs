//! Payment input for activation and renewal

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{BillingError, BillingResult};

/// A settled payment reported by the payment processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PaymentRequest {
    /// Amount in minor currency units (9900 is 99.00)
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount_minor: i64,

    /// ISO 4217 currency code
    #[validate(length(equal = 3, message = "currency must be a 3-letter ISO code"))]
    pub currency: String,

    /// Processor transaction reference
    #[validate(length(min = 1, max = 255, message = "transaction id must be 1-255 characters"))]
    pub transaction_id: String,
}

impl PaymentRequest {
    /// Create a payment request
    pub fn new(
        amount_minor: i64,
        currency: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self {
            amount_minor,
            currency: currency.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Run every rule and return all violations at once
    pub fn check(&self) -> BillingResult<()> {
        let mut problems = match self.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => match BillingError::from(errors) {
                BillingError::Validation(messages) => messages,
                other => return Err(other),
            },
        };

        if !self.currency.is_empty() && !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            problems.push("currency: currency must be upper-case letters".to_string());
        }
        if self.transaction_id.trim().is_empty() && !self.transaction_id.is_empty() {
            problems.push("transaction_id: transaction id must not be blank".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BillingError::Validation(problems))
        }
    }
}
