use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Seat metadata and surcharge for one seat of a showing's hall.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct SeatInfo {
    pub id: i64,
    pub row: i32,
    #[sqlx(rename = "col")]
    pub column: i32,
    pub seat_type: String,
    pub extra_price: Decimal,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ShowingDetails {
    pub id: i64,
    pub movie_title: String,
    pub theater_name: String,
    pub hall_name: String,
    pub starts_at: DateTime<Utc>,
    pub base_price: Decimal,
}
