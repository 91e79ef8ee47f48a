//! Explicit undo steps for multi-step workflows that span Redis, Postgres and
//! the payment provider.
//!
//! A workflow records a [`Compensation`] right after each step that would need
//! undoing, then either [`CompensationLog::discharge`]s the log once the whole
//! workflow succeeded or [`CompensationLog::unwind`]s it on failure.

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::payment::PaymentProvider;
use super::seat_locks::SeatLockManager;
use crate::error::{BookingError, BookingResult};
use crate::models::PaymentStatus;
use crate::repository::PaymentLedger;

#[derive(Debug, Clone, PartialEq)]
pub enum Compensation {
    ReleaseLocks {
        showing_id: i64,
        seat_ids: Vec<i64>,
    },
    /// A pending payment whose checkout never started.
    CancelPayment {
        payment_id: Uuid,
    },
    /// Money was taken but nothing was sold for it.
    RefundPayment {
        payment_id: Uuid,
        provider_reference: String,
        amount: Decimal,
    },
}

/// What a compensation may touch. Steps that need a missing collaborator fail.
pub struct CompensationContext<'a> {
    pub locks: &'a SeatLockManager,
    pub ledger: Option<&'a dyn PaymentLedger>,
    pub provider: Option<&'a dyn PaymentProvider>,
}

#[derive(Debug, Default)]
#[must_use = "a compensation log must be discharged or unwound"]
pub struct CompensationLog {
    steps: Vec<Compensation>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    /// The workflow finished; nothing needs undoing.
    pub fn discharge(self) {}

    /// Runs every recorded step, newest first. All steps are attempted; the
    /// first failure is returned.
    pub async fn unwind(self, ctx: &CompensationContext<'_>, reason: &str) -> BookingResult<()> {
        let mut first_error = None;
        for step in self.steps.into_iter().rev() {
            if let Err(e) = run(&step, ctx, reason).await {
                error!("Compensation {:?} failed: {}", step, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn run(step: &Compensation, ctx: &CompensationContext<'_>, reason: &str) -> BookingResult<()> {
    match step {
        Compensation::ReleaseLocks { showing_id, seat_ids } => {
            ctx.locks.release_all(*showing_id, seat_ids).await;
            info!("Compensated: released {} seat locks for showing {}", seat_ids.len(), showing_id);
            Ok(())
        }
        Compensation::CancelPayment { payment_id } => {
            let ledger = ctx
                .ledger
                .ok_or_else(|| BookingError::Internal("cancel compensation without ledger".into()))?;
            ledger.mark_canceled(*payment_id, Some(reason)).await?;
            info!("Compensated: payment {} canceled ({})", payment_id, reason);
            Ok(())
        }
        Compensation::RefundPayment { payment_id, provider_reference, amount } => {
            let ledger = ctx
                .ledger
                .ok_or_else(|| BookingError::Internal("refund compensation without ledger".into()))?;
            let provider = ctx
                .provider
                .ok_or_else(|| BookingError::Internal("refund compensation without provider".into()))?;

            // повторный прогон не должен вернуть деньги дважды
            if let Some(payment) = ledger.get_payment(*payment_id).await? {
                if payment.status == PaymentStatus::Refunded {
                    warn!("Payment {} already refunded, skipping", payment_id);
                    return Ok(());
                }
            }

            provider
                .issue_refund(provider_reference, *amount)
                .await
                .map_err(|e| BookingError::PaymentProvider(e.to_string()))?;
            ledger.mark_refunded(*payment_id, reason).await?;
            warn!("Compensated: payment {} refunded ({})", payment_id, reason);
            Ok(())
        }
    }
}
