use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::BookingError;
use crate::middleware::Session;
use crate::models::{Cart, CartSeat};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showings/{showing_id}/cart", post(create_cart).delete(delete_cart))
        .route("/showings/{showing_id}/seats/held", get(held_seats))
        .route("/cart", get(current_cart))
}

/* ---------- request / response ---------- */

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCartRequest {
    #[validate(length(min = 1, max = 10), custom(function = "positive_ids"))]
    pub seat_ids: Vec<i64>,
}

fn positive_ids(ids: &[i64]) -> Result<(), ValidationError> {
    if ids.iter().all(|id| *id > 0) {
        Ok(())
    } else {
        Err(ValidationError::new("seat ids must be positive"))
    }
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub cart_id: Uuid,
    pub showing_id: i64,
    pub movie_title: String,
    pub theater_name: String,
    pub hall_name: String,
    pub starts_at: DateTime<Utc>,
    pub seats: Vec<CartSeat>,
    pub base_price: Decimal,
    pub total_price: Decimal,
    pub expires_in_seconds: u64,
}

impl CartResponse {
    fn new(cart: Cart, expires_in_seconds: u64) -> Self {
        Self {
            cart_id: cart.id,
            showing_id: cart.showing_id,
            movie_title: cart.display.movie_title,
            theater_name: cart.display.theater_name,
            hall_name: cart.display.hall_name,
            starts_at: cart.display.starts_at,
            seats: cart.seats,
            base_price: cart.base_price,
            total_price: cart.total_price,
            expires_in_seconds,
        }
    }
}

fn positive(showing_id: i64) -> Result<i64, BookingError> {
    if showing_id > 0 {
        Ok(showing_id)
    } else {
        Err(BookingError::Validation("showing id must be > 0".into()))
    }
}

/* ---------- handlers ---------- */

/// POST /api/showings/{showing_id}/cart
pub async fn create_cart(
    State(state): State<Arc<AppState>>,
    Path(showing_id): Path<i64>,
    session: Session,
    Json(req): Json<CreateCartRequest>,
) -> Result<(StatusCode, Json<CartResponse>), BookingError> {
    req.validate()?;
    let showing_id = positive(showing_id)?;

    let cart = state
        .carts
        .create_cart(&session.session_id, showing_id, &req.seat_ids)
        .await?;
    let ttl = state.carts.hold_policy().ttl().as_secs();
    Ok((StatusCode::CREATED, Json(CartResponse::new(cart, ttl))))
}

/// DELETE /api/showings/{showing_id}/cart
pub async fn delete_cart(
    State(state): State<Arc<AppState>>,
    Path(showing_id): Path<i64>,
    session: Session,
) -> Result<Json<Value>, BookingError> {
    state
        .carts
        .delete_cart(&session.session_id, positive(showing_id)?)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/cart
pub async fn current_cart(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Json<CartResponse>, BookingError> {
    let (cart, remaining) = state
        .carts
        .current_cart(&session.session_id)
        .await?
        .ok_or(BookingError::NotFound("cart"))?;
    Ok(Json(CartResponse::new(cart, remaining.as_secs())))
}

/// GET /api/showings/{showing_id}/seats/held
pub async fn held_seats(
    State(state): State<Arc<AppState>>,
    Path(showing_id): Path<i64>,
) -> Result<Json<Value>, BookingError> {
    let showing_id = positive(showing_id)?;
    let held = state.carts.held_seats(showing_id).await?;
    Ok(Json(json!({ "showing_id": showing_id, "held_seat_ids": held })))
}
