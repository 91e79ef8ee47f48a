use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;

use crate::error::BookingError;
use crate::middleware::Session;
use crate::services::CheckoutRedirect;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/checkout", post(initiate_checkout))
}

/// POST /api/checkout
pub async fn initiate_checkout(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<CheckoutRedirect>, BookingError> {
    let user_id = session.require_user()?;
    let redirect = state
        .checkout
        .initiate_checkout(&session.session_id, user_id)
        .await?;
    Ok(Json(redirect))
}
