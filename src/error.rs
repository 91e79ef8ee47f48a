use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::PaymentStatus;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Lock contention: another session owns at least one of the seats.
    #[error("seat hold is owned by another session")]
    Conflict,
    #[error("one or more seats are already reserved")]
    SeatAlreadyReserved,
    /// The hold lapsed; the client should select seats again.
    #[error("seat hold has expired")]
    Expired,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("session already has an active cart")]
    CartAlreadyExists,
    #[error("payment is {0}, expected pending")]
    PaymentStatusMismatch(PaymentStatus),
    #[error("invalid provider metadata: {0}")]
    InvalidMetadata(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("payment provider error: {0}")]
    PaymentProvider(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::Conflict
            | BookingError::SeatAlreadyReserved
            | BookingError::Expired
            | BookingError::CartAlreadyExists
            | BookingError::PaymentStatusMismatch(_) => StatusCode::CONFLICT,
            BookingError::NotFound(_) => StatusCode::NOT_FOUND,
            BookingError::InvalidMetadata(_) | BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BookingError::PaymentProvider(_) => StatusCode::BAD_GATEWAY,
            BookingError::Redis(_)
            | BookingError::Database(_)
            | BookingError::Serialization(_)
            | BookingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_infra(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BookingError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_infra() {
            tracing::error!("Internal Server Error: {}", self);
            "Internal Server Error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiError { success: false, message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_and_conflict_share_status_but_not_message() {
        assert_eq!(BookingError::Expired.status_code(), StatusCode::CONFLICT);
        assert_eq!(BookingError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_ne!(BookingError::Expired.to_string(), BookingError::Conflict.to_string());
    }

    #[test]
    fn infra_errors_map_to_500() {
        let err = BookingError::Internal("boom".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(BookingError::NotFound("cart").status_code(), StatusCode::NOT_FOUND);
    }
}
