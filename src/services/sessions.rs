use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{BookingError, BookingResult};

/// Claims of a session token. `sid` owns carts and seat holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sid: String,
    pub uid: Option<i64>,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub token: String,
    pub session_id: String,
}

#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl SessionIssuer {
    pub fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.jwt_secret, Duration::hours(config.expires_in_hours))
    }

    pub fn issue_guest(&self) -> BookingResult<IssuedSession> {
        self.issue(None)
    }

    /// Always a fresh session id, never the guest one.
    pub fn issue_for_user(&self, user_id: i64) -> BookingResult<IssuedSession> {
        self.issue(Some(user_id))
    }

    fn issue(&self, uid: Option<i64>) -> BookingResult<IssuedSession> {
        let session_id = format!("sess-{}", Uuid::new_v4());
        let claims = SessionClaims {
            sid: session_id.clone(),
            uid,
            exp: (Utc::now() + self.lifetime).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| BookingError::Internal(format!("Token encoding failed: {}", e)))?;
        Ok(IssuedSession { token, session_id })
    }

    pub fn decode(&self, token: &str) -> BookingResult<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| BookingError::Unauthorized)
    }
}
