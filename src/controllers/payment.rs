use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::BookingError;
use crate::services::payment::ProviderPaymentStatus;
use crate::services::ProviderEvent;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/payment", post(payment_webhook))
}

/// Уведомление платёжного шлюза.
#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    #[serde(rename = "paymentId")]
    pub payment_id: String,
    pub status: String,
    pub token: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// POST /api/webhook/payment
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<PaymentNotification>,
) -> Result<Json<Value>, BookingError> {
    info!("Webhook: payment_id={}, status={}", notification.payment_id, notification.status);

    if !state.gateway.verify_notification(
        &notification.payment_id,
        &notification.status,
        &notification.token,
    ) {
        warn!("Webhook token mismatch for payment {}", notification.payment_id);
        return Err(BookingError::Unauthorized);
    }

    let Some(status) = ProviderPaymentStatus::from_gateway(&notification.status) else {
        debug!("Неизвестный статус {} для платежа {}", notification.status, notification.payment_id);
        return Ok(Json(json!({ "received": true })));
    };

    let ack = state
        .checkout
        .handle_provider_callback(ProviderEvent {
            status,
            provider_reference: notification.payment_id,
            metadata: notification.metadata,
        })
        .await?;

    Ok(Json(json!({ "received": true, "ack": ack })))
}
