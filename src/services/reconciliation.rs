use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::checkout::{CallbackAck, CheckoutOrchestrator, ProviderEvent};
use super::payment::{CorrelationMetadata, PaymentProvider, ProviderPaymentStatus};
use crate::error::{BookingError, BookingResult};
use crate::models::Payment;
use crate::repository::PaymentLedger;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationStats {
    pub examined: usize,
    pub completed: usize,
    pub refunded: usize,
    pub canceled: usize,
    pub skipped: usize,
}

/// Sweeps payments stuck in `pending` because the provider never called back.
pub struct ReconciliationService {
    ledger: Arc<dyn PaymentLedger>,
    provider: Arc<dyn PaymentProvider>,
    checkout: CheckoutOrchestrator,
    stale_after: Duration,
    orphan_after: Duration,
}

impl ReconciliationService {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        provider: Arc<dyn PaymentProvider>,
        checkout: CheckoutOrchestrator,
        stale_after: Duration,
        orphan_after: Duration,
    ) -> Self {
        Self { ledger, provider, checkout, stale_after, orphan_after }
    }

    /// Запускает сверку в цикле
    pub async fn run_periodically(self, interval: Duration) {
        info!("💳 Payment reconciliation every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(stats) if stats.examined > 0 => info!("💳 Reconciliation finished: {:?}", stats),
                Ok(_) => {}
                Err(e) => error!("💳 Reconciliation sweep failed: {}", e),
            }
        }
    }

    pub async fn run_once(&self) -> BookingResult<ReconciliationStats> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| BookingError::Internal(format!("stale_after out of range: {}", e)))?;
        let stale = self.ledger.stale_pending(Utc::now() - stale_after).await?;

        let mut stats = ReconciliationStats::default();
        if stale.is_empty() {
            return Ok(stats);
        }
        info!("💳 Found {} stale pending payments", stale.len());

        for payment in stale {
            stats.examined += 1;
            match self.reconcile(&payment).await {
                Ok(Resolution::Completed) => stats.completed += 1,
                Ok(Resolution::Refunded) => stats.refunded += 1,
                Ok(Resolution::Canceled) => stats.canceled += 1,
                Ok(Resolution::Skipped) => stats.skipped += 1,
                Err(e) => {
                    error!("💳 Failed to reconcile payment {}: {}", payment.id, e);
                    stats.skipped += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn reconcile(&self, payment: &Payment) -> BookingResult<Resolution> {
        // Reference не сохранился: сессия у провайдера могла открыться,
        // поэтому ждём дольше обычного
        let Some(reference) = payment.checkout_reference.as_deref() else {
            if !self.is_orphaned(payment)? {
                info!("💳 Payment {} has no provider reference yet, waiting", payment.id);
                return Ok(Resolution::Skipped);
            }
            let canceled = self
                .ledger
                .mark_canceled(payment.id, Some("no provider reference recorded"))
                .await?;
            return Ok(if canceled { Resolution::Canceled } else { Resolution::Skipped });
        };

        let state = match self.provider.payment_status(reference).await {
            Ok(state) => state,
            Err(e) => {
                warn!("💳 Status check for payment {} failed: {}", payment.id, e);
                return Ok(Resolution::Skipped);
            }
        };

        match state.status {
            ProviderPaymentStatus::Confirmed => {
                if CorrelationMetadata::from_map(&state.metadata).is_err() {
                    warn!("💳 Confirmed payment {} came back without usable metadata", payment.id);
                    self.checkout
                        .refund(payment, reference, "confirmed without correlation metadata")
                        .await?;
                    return Ok(Resolution::Refunded);
                }
                let event = ProviderEvent {
                    status: ProviderPaymentStatus::Confirmed,
                    provider_reference: reference.to_string(),
                    metadata: state.metadata,
                };
                Ok(match self.checkout.handle_provider_callback(event).await? {
                    CallbackAck::Completed { .. } => Resolution::Completed,
                    CallbackAck::Refunded => Resolution::Refunded,
                    CallbackAck::Canceled => Resolution::Canceled,
                    CallbackAck::Duplicate | CallbackAck::Ignored => Resolution::Skipped,
                })
            }
            ProviderPaymentStatus::Failed => {
                let canceled = self
                    .ledger
                    .mark_canceled(payment.id, Some("payment expired at provider"))
                    .await?;
                Ok(if canceled { Resolution::Canceled } else { Resolution::Skipped })
            }
            ProviderPaymentStatus::Refunded => {
                let refunded = self
                    .ledger
                    .mark_refunded(payment.id, "refunded at provider")
                    .await?;
                Ok(if refunded { Resolution::Refunded } else { Resolution::Skipped })
            }
            // пользователь ещё на форме оплаты, следующий проход
            ProviderPaymentStatus::InProgress => Ok(Resolution::Skipped),
        }
    }

    fn is_orphaned(&self, payment: &Payment) -> BookingResult<bool> {
        let orphan_after = chrono::Duration::from_std(self.orphan_after)
            .map_err(|e| BookingError::Internal(format!("orphan_after out of range: {}", e)))?;
        Ok(payment.created_at < Utc::now() - orphan_after)
    }
}

enum Resolution {
    Completed,
    Refunded,
    Canceled,
    Skipped,
}
