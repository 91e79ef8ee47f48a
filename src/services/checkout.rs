//! Checkout and payment completion.
//!
//! `initiate_checkout` opens a pending payment and hands the user to the
//! provider. `handle_provider_callback` turns a confirmed payment into a
//! reservation exactly once, however many times the provider delivers it.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::carts::CartService;
use super::compensation::{Compensation, CompensationContext, CompensationLog};
use super::payment::{
    CheckoutRequest, CorrelationMetadata, LineItem, PaymentProvider, ProviderPaymentStatus,
};
use super::seat_locks::{Ownership, SeatLockManager};
use crate::error::{BookingError, BookingResult};
use crate::models::{Cart, Payment, PaymentStatus};
use crate::repository::{CompletionOutcome, NewReservation, PaymentLedger};

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    pub payment_id: Uuid,
    pub redirect_url: String,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
}

/// A provider notification after its token was checked.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub status: ProviderPaymentStatus,
    pub provider_reference: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackAck {
    Completed { reservation_id: Uuid },
    /// Payment was already completed by an earlier delivery.
    Duplicate,
    /// Money came in but the seats were gone; it went back.
    Refunded,
    Canceled,
    Ignored,
}

#[derive(Clone)]
pub struct CheckoutOrchestrator {
    carts: CartService,
    locks: SeatLockManager,
    ledger: Arc<dyn PaymentLedger>,
    provider: Arc<dyn PaymentProvider>,
    currency: String,
}

impl CheckoutOrchestrator {
    pub fn new(
        carts: CartService,
        locks: SeatLockManager,
        ledger: Arc<dyn PaymentLedger>,
        provider: Arc<dyn PaymentProvider>,
        currency: &str,
    ) -> Self {
        Self { carts, locks, ledger, provider, currency: currency.to_string() }
    }

    fn compensation(&self) -> CompensationContext<'_> {
        CompensationContext {
            locks: &self.locks,
            ledger: Some(self.ledger.as_ref()),
            provider: Some(self.provider.as_ref()),
        }
    }

    pub async fn initiate_checkout(&self, session_id: &str, user_id: i64) -> BookingResult<CheckoutRedirect> {
        let cart = self
            .carts
            .resolve_cart(session_id)
            .await?
            .ok_or(BookingError::NotFound("cart"))?;

        let ownership = self
            .locks
            .verify_ownership(cart.showing_id, &cart.seat_ids(), session_id)
            .await?;
        if ownership != Ownership::Owned {
            info!(session_id, cart_id = %cart.id, ?ownership, "checkout refused, hold lost");
        }
        ownership.into_result()?;

        let payment = Payment::new_pending(user_id, cart.total_price, &self.currency);
        self.ledger.create_payment(&payment).await?;

        let mut log = CompensationLog::new();
        log.record(Compensation::CancelPayment { payment_id: payment.id });

        let request = checkout_request(&cart, &payment, session_id);
        let session = match self.provider.create_checkout_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                error!("Checkout session for payment {} failed: {}", payment.id, e);
                if let Err(unwind_err) = log.unwind(&self.compensation(), &e.to_string()).await {
                    error!("Checkout compensation failed: {}", unwind_err);
                }
                return Err(BookingError::PaymentProvider(e.to_string()));
            }
        };
        log.discharge();

        // Сессия у провайдера уже открыта: платёж не отменяем, его
        // разберёт webhook или сверка
        if let Err(e) = self
            .ledger
            .attach_checkout_reference(payment.id, &session.reference)
            .await
        {
            error!(
                "Failed to store checkout reference {} for payment {}: {:?}",
                session.reference, payment.id, e
            );
            return Err(e.into());
        }

        info!(
            "Payment {} created for cart {}: amount={} {}",
            payment.id, cart.id, payment.amount, payment.currency
        );

        Ok(CheckoutRedirect {
            payment_id: payment.id,
            redirect_url: session.redirect_url,
            amount: payment.amount,
            currency: payment.currency,
        })
    }

    pub async fn handle_provider_callback(&self, event: ProviderEvent) -> BookingResult<CallbackAck> {
        let meta = CorrelationMetadata::from_map(&event.metadata).map_err(BookingError::InvalidMetadata)?;
        let payment = self
            .ledger
            .get_payment(meta.payment_id)
            .await?
            .ok_or(BookingError::NotFound("payment"))?;

        match event.status {
            ProviderPaymentStatus::Confirmed => self.complete(payment, &meta, &event.provider_reference).await,
            ProviderPaymentStatus::Failed => self.cancel(&payment).await,
            other => {
                info!("Webhook for payment {} with status {:?} ignored", payment.id, other);
                Ok(CallbackAck::Ignored)
            }
        }
    }

    async fn complete(
        &self,
        payment: Payment,
        meta: &CorrelationMetadata,
        provider_reference: &str,
    ) -> BookingResult<CallbackAck> {
        if payment.status == PaymentStatus::Completed {
            info!("Payment {} already completed, duplicate delivery", payment.id);
            return Ok(CallbackAck::Duplicate);
        }

        let reference = match (provider_reference.trim(), payment.checkout_reference.as_deref()) {
            ("", Some(stored)) => stored.to_string(),
            ("", None) => {
                return Err(BookingError::InvalidMetadata("missing provider payment reference".into()))
            }
            (given, _) => given.to_string(),
        };

        match payment.status {
            PaymentStatus::Pending => {}
            // Отменён у нас, но провайдер всё же списал деньги
            PaymentStatus::Canceled => {
                return self
                    .refund(&payment, &reference, "payment confirmed after it was canceled")
                    .await
            }
            other => {
                warn!("Completion event for payment {} in status {}", payment.id, other);
                return Err(BookingError::PaymentStatusMismatch(other));
            }
        }

        // Hold мог истечь пока пользователь вводил карту
        let Some(cart) = self.carts.cart_by_id(meta.cart_id).await? else {
            return self.refund_lost_seats(payment.id, &reference, "cart expired before payment completed").await;
        };
        let seat_ids = cart.seat_ids();
        match self
            .locks
            .verify_ownership(cart.showing_id, &seat_ids, &meta.session_id)
            .await?
        {
            Ownership::Owned => {}
            Ownership::Expired => {
                return self
                    .refund_lost_seats(payment.id, &reference, "seat hold expired before payment completed")
                    .await
            }
            Ownership::Conflict => {
                return self
                    .refund_lost_seats(payment.id, &reference, "seats taken by another session")
                    .await
            }
        }

        let outcome = self
            .ledger
            .complete_with_reservation(NewReservation {
                user_id: payment.user_id,
                showing_id: cart.showing_id,
                checkout_reference: Some(reference.clone()),
                payment_id: payment.id,
                seat_ids,
            })
            .await;

        match outcome {
            Ok(CompletionOutcome::Completed(reservation)) => {
                info!(
                    "Payment {} completed, reservation {} for {} seats",
                    payment.id,
                    reservation.id,
                    reservation.seat_ids.len()
                );
                self.carts.discard(&cart, &meta.session_id).await;
                Ok(CallbackAck::Completed { reservation_id: reservation.id })
            }
            Ok(CompletionOutcome::AlreadyFinalized(PaymentStatus::Completed)) => {
                info!("Payment {} completed concurrently, duplicate delivery", payment.id);
                Ok(CallbackAck::Duplicate)
            }
            Ok(CompletionOutcome::AlreadyFinalized(status)) => Err(BookingError::PaymentStatusMismatch(status)),
            Err(e) => {
                error!("Reservation transaction for payment {} failed: {:?}", payment.id, e);
                self.refund_lost_seats(payment.id, &reference, &format!("reservation failed: {}", e))
                    .await
            }
        }
    }

    async fn cancel(&self, payment: &Payment) -> BookingResult<CallbackAck> {
        if self
            .ledger
            .mark_canceled(payment.id, Some("payment failed at provider"))
            .await?
        {
            info!("Payment {} canceled by provider event", payment.id);
            Ok(CallbackAck::Canceled)
        } else {
            info!("Failure event for payment {} in status {}, unchanged", payment.id, payment.status);
            Ok(CallbackAck::Ignored)
        }
    }

    /// Cart cleanup only runs after a completion commits, so a delivery that
    /// finds the seats gone re-reads the payment before giving money back.
    async fn refund_lost_seats(&self, payment_id: Uuid, reference: &str, reason: &str) -> BookingResult<CallbackAck> {
        let payment = self
            .ledger
            .get_payment(payment_id)
            .await?
            .ok_or(BookingError::NotFound("payment"))?;
        match payment.status {
            PaymentStatus::Pending | PaymentStatus::Canceled => self.refund(&payment, reference, reason).await,
            PaymentStatus::Completed => {
                info!("Payment {} completed by a concurrent delivery", payment_id);
                Ok(CallbackAck::Duplicate)
            }
            other => Err(BookingError::PaymentStatusMismatch(other)),
        }
    }

    /// Returns the money for a payment that produced no reservation.
    pub async fn refund(&self, payment: &Payment, reference: &str, reason: &str) -> BookingResult<CallbackAck> {
        warn!("Refunding payment {}: {}", payment.id, reason);
        let mut log = CompensationLog::new();
        log.record(Compensation::RefundPayment {
            payment_id: payment.id,
            provider_reference: reference.to_string(),
            amount: payment.amount,
        });
        log.unwind(&self.compensation(), reason).await?;
        Ok(CallbackAck::Refunded)
    }
}

fn checkout_request(cart: &Cart, payment: &Payment, session_id: &str) -> CheckoutRequest {
    let line_items = cart
        .seats
        .iter()
        .map(|seat| LineItem {
            name: format!("{}: row {}, seat {}", cart.display.movie_title, seat.row, seat.column),
            quantity: 1,
            unit_amount: cart.base_price + seat.extra_price,
        })
        .collect();

    CheckoutRequest {
        metadata: CorrelationMetadata {
            cart_id: cart.id,
            payment_id: payment.id,
            user_id: payment.user_id,
            session_id: session_id.to_string(),
        },
        amount: payment.amount,
        currency: payment.currency.clone(),
        description: format!(
            "{} - {} ({} ticket(s))",
            cart.display.movie_title,
            cart.display.starts_at.format("%Y-%m-%d %H:%M"),
            cart.seats.len()
        ),
        line_items,
    }
}
