use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Canceled,
    Refunded,
}

impl PaymentStatus {
    /// pending -> completed | canceled | refunded, completed | canceled -> refunded.
    ///
    /// A pending payment goes straight to refunded when the provider took the
    /// money but the reservation could not be written. A canceled one is
    /// refunded when the provider confirms it anyway.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Canceled)
                | (PaymentStatus::Pending, PaymentStatus::Refunded)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
                | (PaymentStatus::Canceled, PaymentStatus::Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Canceled => "canceled",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub checkout_reference: Option<String>,
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new_pending(user_id: i64, amount: Decimal, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            currency: currency.to_string(),
            status: PaymentStatus::Pending,
            checkout_reference: None,
            error_message: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
