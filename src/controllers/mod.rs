pub mod carts;
pub mod checkout;
pub mod payment;
pub mod sessions;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(sessions::routes())
        .merge(carts::routes())
        .merge(checkout::routes())
        .merge(payment::routes())
}

/// Full HTTP surface with state attached.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
