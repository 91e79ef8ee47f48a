//! Durable-store double for tests and demo runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{CompletionOutcome, NewReservation, PaymentLedger, ShowingCatalog, UserDirectory};
use crate::models::{Payment, PaymentStatus, Reservation, SeatInfo, ShowingDetails, User};

#[derive(Default)]
struct State {
    showings: HashMap<i64, ShowingDetails>,
    seats: HashMap<i64, Vec<SeatInfo>>,
    payments: HashMap<Uuid, Payment>,
    reservations: Vec<Reservation>,
    users: Vec<User>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_completions: AtomicBool,
    fail_reference_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_showing(&self, showing: ShowingDetails, seats: Vec<SeatInfo>) {
        let mut state = self.state();
        state.seats.insert(showing.id, seats);
        state.showings.insert(showing.id, showing);
    }

    pub fn add_user(&self, user: User) {
        self.state().users.push(user);
    }

    /// Makes the completion transaction fail (and roll back) until switched off.
    pub fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Makes `attach_checkout_reference` fail until switched off.
    pub fn fail_reference_updates(&self, fail: bool) {
        self.fail_reference_updates.store(fail, Ordering::SeqCst);
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.state().reservations.clone()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.state().payments.values().cloned().collect()
    }

    /// Shifts a payment's creation time, for reconciliation tests.
    pub fn backdate_payment(&self, payment_id: Uuid, created_at: DateTime<Utc>) {
        if let Some(payment) = self.state().payments.get_mut(&payment_id) {
            payment.created_at = created_at;
        }
    }

    /// Inserts a reservation directly, as a sale made through another cart.
    pub fn insert_reservation(&self, reservation: Reservation) {
        self.state().reservations.push(reservation);
    }
}

#[async_trait]
impl ShowingCatalog for MemoryStore {
    async fn showing_details(&self, showing_id: i64) -> sqlx::Result<Option<ShowingDetails>> {
        Ok(self.state().showings.get(&showing_id).cloned())
    }

    async fn reserved_seat_ids(&self, showing_id: i64) -> sqlx::Result<HashSet<i64>> {
        Ok(self
            .state()
            .reservations
            .iter()
            .filter(|r| r.showing_id == showing_id)
            .flat_map(|r| r.seat_ids.iter().copied())
            .collect())
    }

    async fn seats_by_ids(&self, showing_id: i64, seat_ids: &[i64]) -> sqlx::Result<Vec<SeatInfo>> {
        let wanted: HashSet<i64> = seat_ids.iter().copied().collect();
        Ok(self
            .state()
            .seats
            .get(&showing_id)
            .map(|seats| {
                seats
                    .iter()
                    .filter(|s| wanted.contains(&s.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl PaymentLedger for MemoryStore {
    async fn create_payment(&self, payment: &Payment) -> sqlx::Result<()> {
        self.state().payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> sqlx::Result<Option<Payment>> {
        Ok(self.state().payments.get(&payment_id).cloned())
    }

    async fn attach_checkout_reference(&self, payment_id: Uuid, reference: &str) -> sqlx::Result<()> {
        if self.fail_reference_updates.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("injected reference update failure".into()));
        }
        if let Some(payment) = self.state().payments.get_mut(&payment_id) {
            payment.checkout_reference = Some(reference.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_with_reservation(&self, reservation: NewReservation) -> sqlx::Result<CompletionOutcome> {
        let mut state = self.state();

        let status = state
            .payments
            .get(&reservation.payment_id)
            .map(|p| p.status)
            .ok_or(sqlx::Error::RowNotFound)?;
        if status != PaymentStatus::Pending {
            return Ok(CompletionOutcome::AlreadyFinalized(status));
        }

        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(sqlx::Error::Protocol("injected completion failure".into()));
        }

        let sold: HashSet<i64> = state
            .reservations
            .iter()
            .filter(|r| r.showing_id == reservation.showing_id)
            .flat_map(|r| r.seat_ids.iter().copied())
            .collect();
        if reservation.seat_ids.iter().any(|id| sold.contains(id)) {
            return Err(sqlx::Error::Protocol(
                "duplicate key value violates unique constraint \"reservation_seats_pkey\"".into(),
            ));
        }

        let now = Utc::now();
        if let Some(payment) = state.payments.get_mut(&reservation.payment_id) {
            payment.status = PaymentStatus::Completed;
            payment.paid_at = Some(now);
            payment.updated_at = now;
            if reservation.checkout_reference.is_some() {
                payment.checkout_reference = reservation.checkout_reference.clone();
            }
        }

        let stored = Reservation {
            id: Uuid::new_v4(),
            user_id: reservation.user_id,
            showing_id: reservation.showing_id,
            checkout_reference: reservation.checkout_reference,
            payment_id: reservation.payment_id,
            seat_ids: reservation.seat_ids,
            created_at: now,
        };
        state.reservations.push(stored.clone());
        Ok(CompletionOutcome::Completed(stored))
    }

    async fn mark_refunded(&self, payment_id: Uuid, error_message: &str) -> sqlx::Result<bool> {
        let mut state = self.state();
        let Some(payment) = state.payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if !payment.status.can_transition_to(PaymentStatus::Refunded) {
            return Ok(false);
        }
        payment.status = PaymentStatus::Refunded;
        payment.error_message = Some(error_message.to_string());
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_canceled(&self, payment_id: Uuid, error_message: Option<&str>) -> sqlx::Result<bool> {
        let mut state = self.state();
        let Some(payment) = state.payments.get_mut(&payment_id) else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending {
            return Ok(false);
        }
        payment.status = PaymentStatus::Canceled;
        if let Some(message) = error_message {
            payment.error_message = Some(message.to_string());
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn stale_pending(&self, created_before: DateTime<Utc>) -> sqlx::Result<Vec<Payment>> {
        let mut stale: Vec<Payment> = self
            .state()
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.created_at);
        Ok(stale)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_active_by_email(&self, email: &str) -> sqlx::Result<Option<User>> {
        Ok(self
            .state()
            .users
            .iter()
            .find(|u| u.email == email && u.is_active)
            .cloned())
    }
}
