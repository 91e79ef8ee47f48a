use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::BookingError;
use crate::middleware::BasicCredentials;
use crate::services::MigrationOutcome;
use crate::AppState;

/// Guest token presented at login so its cart can follow the user.
pub const GUEST_SESSION_HEADER: &str = "x-session-token";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions/guest", post(create_guest_session))
        .route("/auth/login", post(login))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub session_id: String,
    pub user_id: i64,
    pub migrated_cart_id: Option<Uuid>,
}

/// POST /api/sessions/guest
pub async fn create_guest_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionResponse>), BookingError> {
    let issued = state.sessions.issue_guest()?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse { token: issued.token, session_id: issued.session_id }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    credentials: BasicCredentials,
) -> Result<Json<LoginResponse>, BookingError> {
    let user = state
        .users
        .find_active_by_email(&credentials.email)
        .await?
        .ok_or(BookingError::Unauthorized)?;

    // bcrypt нагружает CPU, не держим им executor
    let password = credentials.password;
    let verifier = user.clone();
    let valid = tokio::task::spawn_blocking(move || verifier.verify_password(&password))
        .await
        .map_err(|e| BookingError::Internal(format!("password check failed: {}", e)))?;
    if !valid {
        return Err(BookingError::Unauthorized);
    }

    // Новый sid всегда, иначе session fixation
    let issued = state.sessions.issue_for_user(user.id)?;

    let guest = headers
        .get(GUEST_SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|token| state.sessions.decode(token).ok());

    let migrated_cart_id = match guest {
        Some(claims) => match state.migration.migrate_locks(&claims.sid, &issued.session_id).await {
            Ok(MigrationOutcome::Migrated { cart_id, .. }) => Some(cart_id),
            Ok(MigrationOutcome::NoCartToMigrate) => None,
            Err(e) => {
                warn!("Cart migration on login failed for user {}: {}", user.id, e);
                None
            }
        },
        None => None,
    };

    info!("User {} logged in", user.id);
    Ok(Json(LoginResponse {
        token: issued.token,
        session_id: issued.session_id,
        user_id: user.id,
        migrated_cart_id,
    }))
}
