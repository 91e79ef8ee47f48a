use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Payment, PaymentStatus, Reservation, SeatInfo, ShowingDetails, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read-only view of showings, their seats and what is already sold.
#[async_trait]
pub trait ShowingCatalog: Send + Sync {
    async fn showing_details(&self, showing_id: i64) -> sqlx::Result<Option<ShowingDetails>>;

    /// Seats of the showing that belong to a reservation.
    async fn reserved_seat_ids(&self, showing_id: i64) -> sqlx::Result<HashSet<i64>>;

    /// Metadata for the requested seats that exist in the showing's hall.
    /// Unknown ids are simply missing from the result.
    async fn seats_by_ids(&self, showing_id: i64, seat_ids: &[i64]) -> sqlx::Result<Vec<SeatInfo>>;
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub user_id: i64,
    pub showing_id: i64,
    pub checkout_reference: Option<String>,
    pub payment_id: Uuid,
    pub seat_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Completed(Reservation),
    /// The payment left `pending` before this call; nothing was written.
    AlreadyFinalized(PaymentStatus),
}

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn create_payment(&self, payment: &Payment) -> sqlx::Result<()>;

    async fn get_payment(&self, payment_id: Uuid) -> sqlx::Result<Option<Payment>>;

    async fn attach_checkout_reference(&self, payment_id: Uuid, reference: &str) -> sqlx::Result<()>;

    /// Flips a pending payment to completed and inserts its reservation in one
    /// transaction.
    async fn complete_with_reservation(&self, reservation: NewReservation) -> sqlx::Result<CompletionOutcome>;

    /// pending|completed|canceled -> refunded. Returns `false` if the payment
    /// was already refunded.
    async fn mark_refunded(&self, payment_id: Uuid, error_message: &str) -> sqlx::Result<bool>;

    /// pending -> canceled. Returns `false` if it was no longer pending.
    async fn mark_canceled(&self, payment_id: Uuid, error_message: Option<&str>) -> sqlx::Result<bool>;

    async fn stale_pending(&self, created_before: DateTime<Utc>) -> sqlx::Result<Vec<Payment>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_active_by_email(&self, email: &str) -> sqlx::Result<Option<User>>;
}
