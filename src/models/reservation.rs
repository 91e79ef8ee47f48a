use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Permanent record of sold seats. Written once per completed payment.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i64,
    pub showing_id: i64,
    pub checkout_reference: Option<String>,
    pub payment_id: Uuid,
    pub seat_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
}
