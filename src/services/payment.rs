//! payment.rs
//!
//! Граница с внешним платёжным шлюзом.
//!
//! 1.  **PaymentProvider**: то, что ядру нужно от провайдера: открыть checkout,
//!     вернуть деньги, узнать статус платежа.
//! 2.  **CorrelationMetadata**: типизированные поля, которые проходят через
//!     провайдера туда и обратно в виде строкового словаря.
//! 3.  **PaymentGatewayClient**: HTTP-клиент шлюза. Запросы подписываются
//!     SHA-256 токеном, все сетевые вызовы идут через circuit breaker.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as _;
use failsafe::{backoff, failure_policy, StateMachine};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, PaymentConfig};

// --- Контракт провайдера ---

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Circuit breaker открыт, запрос не отправлялся.
    #[error("payment gateway temporarily unavailable")]
    Unavailable,
    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment gateway rejected request (code {code:?}): {message}")]
    Rejected { code: Option<i32>, message: String },
    #[error("amount {0} does not fit the gateway's minor units")]
    InvalidAmount(Decimal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub metadata: CorrelationMetadata,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    /// Provider-side payment id.
    pub reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPaymentStatus {
    Confirmed,
    InProgress,
    Failed,
    Refunded,
}

impl ProviderPaymentStatus {
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "CONFIRMED" | "COMPLETED" => Some(Self::Confirmed),
            "NEW" | "FORM_SHOWED" | "AUTHORIZING" | "AUTHORIZED" => Some(Self::InProgress),
            "CANCELLED" | "FAILED" | "REJECTED" | "EXPIRED" | "DEADLINE_EXPIRED" => Some(Self::Failed),
            "REFUNDED" | "PARTIAL_REFUNDED" => Some(Self::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPaymentState {
    pub status: ProviderPaymentStatus,
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ProviderError>;

    /// Must be safe to call again for an already refunded payment.
    async fn issue_refund(&self, reference: &str, amount: Decimal) -> Result<(), ProviderError>;

    async fn payment_status(&self, reference: &str) -> Result<ProviderPaymentState, ProviderError>;
}

// --- Correlation metadata ---

const CART_ID: &str = "cart_id";
const PAYMENT_ID: &str = "payment_id";
const USER_ID: &str = "user_id";
const SESSION_ID: &str = "session_id";

/// Fields handed to the provider at checkout and read back from its events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationMetadata {
    pub cart_id: Uuid,
    pub payment_id: Uuid,
    pub user_id: i64,
    pub session_id: String,
}

impl CorrelationMetadata {
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (CART_ID.to_string(), self.cart_id.to_string()),
            (PAYMENT_ID.to_string(), self.payment_id.to_string()),
            (USER_ID.to_string(), self.user_id.to_string()),
            (SESSION_ID.to_string(), self.session_id.clone()),
        ])
    }

    /// Rejects the map if any field is missing or malformed.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, String> {
        fn field<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str, String> {
            map.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing {}", key))
        }

        let cart_id = Uuid::parse_str(field(map, CART_ID)?)
            .map_err(|_| format!("malformed {}", CART_ID))?;
        let payment_id = Uuid::parse_str(field(map, PAYMENT_ID)?)
            .map_err(|_| format!("malformed {}", PAYMENT_ID))?;
        let user_id = field(map, USER_ID)?
            .parse::<i64>()
            .map_err(|_| format!("malformed {}", USER_ID))?;
        let session_id = field(map, SESSION_ID)?.to_string();

        Ok(Self { cart_id, payment_id, user_id, session_id })
    }
}

// --- Подпись запросов ---

/// Merchant credentials, used to sign requests and verify notifications.
#[derive(Clone)]
pub struct GatewayCredentials {
    team_slug: String,
    password: String,
}

impl GatewayCredentials {
    pub fn new(team_slug: &str, password: &str) -> Self {
        Self { team_slug: team_slug.to_string(), password: password.to_string() }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(&config.merchant_id, &config.merchant_password)
    }

    fn sign(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hasher.update(self.password.as_bytes());
        hasher.update(self.team_slug.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Токен для инициации платежа
    fn init_token(&self, amount: i64, currency: &str, order_id: &str) -> String {
        self.sign(&[&amount.to_string(), currency, order_id])
    }

    /// Токен для проверки статуса
    fn check_token(&self, payment_id: &str) -> String {
        self.sign(&[payment_id])
    }

    fn refund_token(&self, amount: i64, payment_id: &str) -> String {
        self.sign(&[&amount.to_string(), payment_id])
    }

    pub fn notification_token(&self, payment_id: &str, status: &str) -> String {
        self.sign(&[payment_id, status])
    }

    pub fn verify_notification(&self, payment_id: &str, status: &str, token: &str) -> bool {
        self.notification_token(payment_id, status).eq_ignore_ascii_case(token)
    }
}

// --- Модели данных для API платёжного шлюза ---

/// Запрос на инициацию платежа.
#[derive(Debug, Serialize)]
struct PaymentInitRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    amount: i64,
    #[serde(rename = "orderId")]
    order_id: String,
    currency: String,
    description: String,
    #[serde(rename = "successURL")]
    success_url: String,
    #[serde(rename = "failURL")]
    fail_url: String,
    #[serde(rename = "notificationURL")]
    notification_url: String,
    items: Vec<GatewayItem>,
    metadata: HashMap<String, String>,
    language: String,
}

#[derive(Debug, Serialize)]
struct GatewayItem {
    name: String,
    quantity: u32,
    amount: i64,
}

/// Ответ от API на инициацию платежа.
#[derive(Debug, Deserialize)]
pub struct PaymentInitResponse {
    pub success: bool,
    #[serde(rename = "paymentId")]
    pub payment_id: Option<String>,
    #[serde(rename = "paymentURL")]
    pub payment_url: Option<String>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// Запрос на проверку статуса платежа.
#[derive(Debug, Serialize)]
struct PaymentCheckRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
}

/// Ответ от API на проверку статуса платежа.
#[derive(Debug, Deserialize)]
pub struct PaymentCheckResponse {
    pub success: bool,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// Запрос на возврат средств.
#[derive(Debug, Serialize)]
struct PaymentRefundRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
    amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRefundResponse {
    pub success: bool,
    pub status: Option<String>,
    pub code: Option<i32>,
    pub message: Option<String>,
}

/// Сумма в минимальных единицах валюты (центы, тиыны).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ProviderError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or(ProviderError::InvalidAmount(amount))
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// Клиент для взаимодействия с API платёжного шлюза.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    credentials: GatewayCredentials,
    /// Базовый URL платёжного шлюза.
    base_url: String,
    success_url: String,
    fail_url: String,
    webhook_url: String,
    /// Асинхронный HTTP-клиент.
    http_client: reqwest::Client,
    circuit_breaker: Breaker,
}

impl PaymentGatewayClient {
    /// Создает и конфигурирует клиент на основе настроек приложения.
    pub fn from_config(
        config: &PaymentConfig,
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self, reqwest::Error> {
        let circuit_breaker = failsafe::Config::new()
            .failure_policy(failure_policy::consecutive_failures(
                breaker.failure_threshold,
                backoff::constant(Duration::from_secs(breaker.timeout_seconds)),
            ))
            .build();

        Ok(Self {
            credentials: GatewayCredentials::from_config(config),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            success_url: config.success_url.clone(),
            fail_url: config.fail_url.clone(),
            webhook_url: config.webhook_url.clone(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_seconds))
                .build()?,
            circuit_breaker,
        })
    }

    pub fn credentials(&self) -> &GatewayCredentials {
        &self.credentials
    }

    /// Выполняет POST к шлюзу через circuit breaker.
    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let operation = async {
            self.http_client
                .post(&url)
                .json(body)
                .send()
                .await?
                .error_for_status()?
                .json::<Resp>()
                .await
        };

        match self.circuit_breaker.call(operation).await {
            Ok(response) => Ok(response),
            Err(failsafe::Error::Rejected) => {
                warn!("Circuit breaker is OPEN - blocking payment gateway request to {}", path);
                Err(ProviderError::Unavailable)
            }
            Err(failsafe::Error::Inner(e)) => {
                error!("Payment gateway request to {} failed: {:?}", path, e);
                Err(ProviderError::Http(e))
            }
        }
    }
}

#[async_trait]
impl PaymentProvider for PaymentGatewayClient {
    /// Создаёт платёж в платёжной системе.
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ProviderError> {
        let amount = to_minor_units(request.amount)?;
        let items = request
            .line_items
            .iter()
            .map(|item| {
                Ok(GatewayItem {
                    name: item.name.clone(),
                    quantity: item.quantity,
                    amount: to_minor_units(item.unit_amount)?,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;
        let order_id = request.metadata.payment_id.to_string();

        let body = PaymentInitRequest {
            team_slug: self.credentials.team_slug.clone(),
            token: self.credentials.init_token(amount, &request.currency, &order_id),
            amount,
            order_id,
            currency: request.currency.clone(),
            description: request.description.clone(),
            success_url: self.success_url.clone(),
            fail_url: self.fail_url.clone(),
            notification_url: self.webhook_url.clone(),
            items,
            metadata: request.metadata.to_map(),
            language: "en".to_string(),
        };

        info!("Creating payment: amount={}, currency={}", amount, request.currency);

        let response: PaymentInitResponse = self.post("/api/v1/PaymentInit/init", &body).await?;
        if !response.success {
            return Err(ProviderError::Rejected {
                code: response.code,
                message: response.message.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        match (response.payment_id, response.payment_url) {
            (Some(reference), Some(redirect_url)) => Ok(CheckoutSession { reference, redirect_url }),
            _ => Err(ProviderError::Rejected {
                code: response.code,
                message: "gateway response without paymentId or paymentURL".to_string(),
            }),
        }
    }

    async fn issue_refund(&self, reference: &str, amount: Decimal) -> Result<(), ProviderError> {
        let amount = to_minor_units(amount)?;
        let body = PaymentRefundRequest {
            team_slug: self.credentials.team_slug.clone(),
            token: self.credentials.refund_token(amount, reference),
            payment_id: reference.to_string(),
            amount,
        };

        info!("Refunding payment {}: amount={}", reference, amount);

        let response: PaymentRefundResponse = self.post("/api/v1/PaymentCancel/cancel", &body).await?;
        let already_refunded = response
            .status
            .as_deref()
            .and_then(ProviderPaymentStatus::from_gateway)
            == Some(ProviderPaymentStatus::Refunded);

        if response.success || already_refunded {
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                code: response.code,
                message: response.message.unwrap_or_else(|| "refund rejected".to_string()),
            })
        }
    }

    /// Проверяет статус платежа через API.
    async fn payment_status(&self, reference: &str) -> Result<ProviderPaymentState, ProviderError> {
        let body = PaymentCheckRequest {
            team_slug: self.credentials.team_slug.clone(),
            token: self.credentials.check_token(reference),
            payment_id: reference.to_string(),
        };

        let response: PaymentCheckResponse = self.post("/api/v1/PaymentCheck/check", &body).await?;
        let status = response
            .status
            .as_deref()
            .and_then(ProviderPaymentStatus::from_gateway);

        match (response.success, status) {
            (true, Some(status)) => Ok(ProviderPaymentState { status, metadata: response.metadata }),
            _ => Err(ProviderError::Rejected {
                code: response.code,
                message: response
                    .message
                    .unwrap_or_else(|| format!("unexpected status {:?}", response.status)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str, failure_threshold: u32) -> PaymentGatewayClient {
        let config = PaymentConfig {
            merchant_id: "cinema".into(),
            merchant_password: "secret".into(),
            gateway_url: base_url.into(),
            success_url: "https://example.com/ok".into(),
            fail_url: "https://example.com/fail".into(),
            webhook_url: "https://example.com/api/webhook/payment".into(),
            currency: "USD".into(),
            request_timeout_seconds: 5,
        };
        let breaker = CircuitBreakerConfig { failure_threshold, timeout_seconds: 60 };
        PaymentGatewayClient::from_config(&config, &breaker).unwrap()
    }

    fn metadata() -> CorrelationMetadata {
        CorrelationMetadata {
            cart_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            user_id: 42,
            session_id: "sess-1".into(),
        }
    }

    fn checkout_request() -> CheckoutRequest {
        CheckoutRequest {
            metadata: metadata(),
            amount: dec!(175.00),
            currency: "USD".into(),
            description: "3 tickets".into(),
            line_items: vec![LineItem { name: "Seat 1-1".into(), quantity: 1, unit_amount: dec!(50) }],
        }
    }

    #[test]
    fn metadata_round_trips_through_the_string_map() {
        let meta = metadata();
        assert_eq!(CorrelationMetadata::from_map(&meta.to_map()).unwrap(), meta);
    }

    #[test]
    fn metadata_rejects_missing_and_malformed_fields() {
        let mut map = metadata().to_map();
        map.remove(SESSION_ID);
        assert_eq!(CorrelationMetadata::from_map(&map).unwrap_err(), "missing session_id");

        let mut map = metadata().to_map();
        map.insert(PAYMENT_ID.into(), "not-a-uuid".into());
        assert_eq!(CorrelationMetadata::from_map(&map).unwrap_err(), "malformed payment_id");

        let mut map = metadata().to_map();
        map.insert(USER_ID.into(), "".into());
        assert_eq!(CorrelationMetadata::from_map(&map).unwrap_err(), "missing user_id");
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        assert_eq!(to_minor_units(dec!(175)).unwrap(), 17500);
        assert_eq!(to_minor_units(dec!(10.005)).unwrap(), 1001);
        assert_eq!(to_minor_units(dec!(10.025)).unwrap(), 1003);
    }

    #[test]
    fn amounts_beyond_minor_unit_range_are_rejected() {
        let err = to_minor_units(Decimal::MAX).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidAmount(_)));
        let err = to_minor_units(Decimal::from(i64::MAX)).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidAmount(_)));
    }

    #[test]
    fn notification_token_verification() {
        let creds = GatewayCredentials::new("cinema", "secret");
        let token = creds.notification_token("pay-1", "CONFIRMED");
        assert!(creds.verify_notification("pay-1", "CONFIRMED", &token));
        assert!(creds.verify_notification("pay-1", "CONFIRMED", &token.to_uppercase()));
        assert!(!creds.verify_notification("pay-1", "CANCELLED", &token));
    }

    #[tokio::test]
    async fn creates_checkout_session_with_signed_request() {
        let server = MockServer::start().await;
        let request = checkout_request();
        let expected_token = GatewayCredentials::new("cinema", "secret").init_token(
            17500,
            "USD",
            &request.metadata.payment_id.to_string(),
        );

        Mock::given(method("POST"))
            .and(path("/api/v1/PaymentInit/init"))
            .and(body_partial_json(json!({
                "teamSlug": "cinema",
                "amount": 17500,
                "token": expected_token,
                "metadata": { "user_id": "42", "session_id": "sess-1" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "paymentId": "gw-1",
                "paymentURL": "https://gateway.example.com/pay/gw-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server.uri(), 5)
            .create_checkout_session(&request)
            .await
            .unwrap();
        assert_eq!(session.reference, "gw-1");
        assert_eq!(session.redirect_url, "https://gateway.example.com/pay/gw-1");
    }

    #[tokio::test]
    async fn rejected_init_surfaces_gateway_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/PaymentInit/init"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "code": 1001,
                "message": "merchant disabled"
            })))
            .mount(&server)
            .await;

        let err = client(&server.uri(), 5)
            .create_checkout_session(&checkout_request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { code: Some(1001), .. }));
    }

    #[tokio::test]
    async fn refund_treats_already_refunded_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/PaymentCancel/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "status": "REFUNDED",
                "message": "already refunded"
            })))
            .mount(&server)
            .await;

        client(&server.uri(), 5).issue_refund("gw-1", dec!(175)).await.unwrap();
    }

    #[tokio::test]
    async fn payment_status_parses_metadata() {
        let server = MockServer::start().await;
        let meta = metadata();
        Mock::given(method("POST"))
            .and(path("/api/v1/PaymentCheck/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "status": "CONFIRMED",
                "metadata": meta.to_map()
            })))
            .mount(&server)
            .await;

        let state = client(&server.uri(), 5).payment_status("gw-1").await.unwrap();
        assert_eq!(state.status, ProviderPaymentStatus::Confirmed);
        assert_eq!(CorrelationMetadata::from_map(&state.metadata).unwrap(), meta);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server.uri(), 2);
        for _ in 0..2 {
            let err = client.payment_status("gw-1").await.unwrap_err();
            assert!(matches!(err, ProviderError::Http(_)));
        }
        let err = client.payment_status("gw-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable));
    }
}
