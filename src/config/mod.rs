use config::builder::{ConfigBuilder, DefaultState};
use serde::Deserialize;
use std::env;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub session: SessionConfig,
    pub payment: PaymentConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub hold: HoldConfig,
    pub reconciliation: ReconciliationConfig,
    pub features: FeatureFlags,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

// Настройки Redis
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Session tokens (guest and authenticated)
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub jwt_secret: String,
    pub expires_in_hours: i64,
}

// Настройки платежного шлюза
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub merchant_id: String,
    pub merchant_password: String,
    pub gateway_url: String,
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
    pub currency: String,
    pub request_timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldConfig {
    pub hold_seconds: u64,
    pub migration_grace_seconds: u64,
    pub max_seats_per_cart: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub interval_seconds: u64,
    pub stale_after_seconds: u64,
    /// Pending payments that never got a provider reference are canceled
    /// only after this long.
    pub orphan_after_seconds: u64,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_reconciliation: bool,
}

/// Hold timings shared by seat locks and carts.
///
/// Both TTLs are read from here so a cart can never outlive its locks or the
/// other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    ttl: Duration,
    migration_grace: Duration,
}

impl HoldPolicy {
    pub fn new(ttl: Duration, migration_grace: Duration) -> Self {
        Self { ttl, migration_grace }
    }

    /// TTL applied to every seat lock and to the cart snapshot.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn migration_grace(&self) -> Duration {
        self.migration_grace
    }

    /// TTL to apply after a session migration with `remaining` hold time left.
    pub fn migrated_ttl(&self, remaining: Duration) -> Duration {
        remaining + self.migration_grace
    }
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(60))
    }
}

impl HoldConfig {
    pub fn policy(&self) -> HoldPolicy {
        HoldPolicy::new(
            Duration::from_secs(self.hold_seconds),
            Duration::from_secs(self.migration_grace_seconds),
        )
    }
}

impl Config {
    /// Defaults, then `BOOKING__SECTION__KEY` overrides, then the conventional
    /// deployment variables (`DATABASE_URL`, `REDIS_URL`, ...).
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let builder = Self::defaults()?
            .add_source(config::Environment::with_prefix("BOOKING").separator("__"))
            .set_override_option("app.host", env::var("HOST").ok())?
            .set_override_option("app.port", env::var("PORT").ok())?
            .set_override_option("app.environment", env::var("ENVIRONMENT").ok())?
            .set_override_option("app.rust_log", env::var("RUST_LOG").ok())?
            .set_override_option("app.log_format", env::var("LOG_FORMAT").ok())?
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .set_override_option("database.pool_size", env::var("DB_POOL_SIZE").ok())?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("session.jwt_secret", env::var("JWT_SECRET").ok())?
            .set_override_option("session.expires_in_hours", env::var("JWT_EXPIRES_IN_HOURS").ok())?
            .set_override_option("payment.merchant_id", env::var("MERCHANT_ID").ok())?
            .set_override_option("payment.merchant_password", env::var("MERCHANT_PASSWORD").ok())?
            .set_override_option("payment.gateway_url", env::var("PAYMENT_GATEWAY_URL").ok())?
            .set_override_option("payment.success_url", env::var("PAYMENT_SUCCESS_URL").ok())?
            .set_override_option("payment.fail_url", env::var("PAYMENT_FAIL_URL").ok())?
            .set_override_option("payment.webhook_url", env::var("PAYMENT_WEBHOOK_URL").ok())?
            .set_override_option(
                "circuit_breaker.failure_threshold",
                env::var("CIRCUIT_BREAKER_FAILURE_THRESHOLD").ok(),
            )?
            .set_override_option(
                "circuit_breaker.timeout_seconds",
                env::var("CIRCUIT_BREAKER_TIMEOUT_SECONDS").ok(),
            )?
            .set_override_option("hold.hold_seconds", env::var("HOLD_SECONDS").ok())?
            .set_override_option(
                "features.enable_reconciliation",
                env::var("ENABLE_RECONCILIATION").ok(),
            )?;

        builder.build()?.try_deserialize()
    }

    /// Defaults plus explicit `section.key` values, ignoring the environment.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = Self::defaults()?;
        for (key, value) in pairs {
            builder = builder.set_override(key, value)?;
        }
        builder.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        config::Config::builder()
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 8000)?
            .set_default("app.environment", "development")?
            .set_default("app.rust_log", "showtime_booking=debug,tower_http=debug")?
            .set_default("app.log_format", "text")?
            .set_default("database.pool_size", 20)?
            .set_default("session.expires_in_hours", 24)?
            .set_default("payment.gateway_url", "https://gateway.example.com")?
            .set_default("payment.success_url", "https://your-domain.com/payment/success")?
            .set_default("payment.fail_url", "https://your-domain.com/payment/fail")?
            .set_default("payment.webhook_url", "https://your-domain.com/api/webhook/payment")?
            .set_default("payment.currency", "USD")?
            .set_default("payment.request_timeout_seconds", 30)?
            .set_default("circuit_breaker.failure_threshold", 5)?
            .set_default("circuit_breaker.timeout_seconds", 60)?
            .set_default("hold.hold_seconds", 600)?
            .set_default("hold.migration_grace_seconds", 60)?
            .set_default("hold.max_seats_per_cart", 10)?
            .set_default("reconciliation.interval_seconds", 300)?
            .set_default("reconciliation.stale_after_seconds", 900)?
            .set_default("reconciliation.orphan_after_seconds", 7200)?
            .set_default("features.enable_reconciliation", true)
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        self.hold.policy()
    }
}
