use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

use crate::error::BookingError;
use crate::AppState;

/// Session from the `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<i64>,
}

impl Session {
    pub fn require_user(&self) -> Result<i64, BookingError> {
        self.user_id.ok_or(BookingError::Unauthorized)
    }
}

fn authorization<'a>(parts: &'a Parts) -> Result<&'a str, BookingError> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(BookingError::Unauthorized)
}

impl FromRequestParts<Arc<AppState>> for Session {
    type Rejection = BookingError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = authorization(parts)?
            .strip_prefix("Bearer ")
            .ok_or(BookingError::Unauthorized)?;

        let claims = state.sessions.decode(token)?;
        Ok(Session { session_id: claims.sid, user_id: claims.uid })
    }
}

/// `email:password` from a Basic header. Checking them is up to the handler.
#[derive(Debug, Clone)]
pub struct BasicCredentials {
    pub email: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn parse(header_value: &str) -> Option<Self> {
        let encoded = header_value.strip_prefix("Basic ")?;
        let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
        let credentials = String::from_utf8(decoded).ok()?;

        // Разделяем email:password
        let (email, password) = credentials.split_once(':')?;
        if email.is_empty() {
            return None;
        }
        Some(Self { email: email.to_string(), password: password.to_string() })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for BasicCredentials {
    type Rejection = BookingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::parse(authorization(parts)?).ok_or(BookingError::Unauthorized)
    }
}
