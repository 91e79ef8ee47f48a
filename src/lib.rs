pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod repository;
pub mod services;

use std::sync::Arc;
use tracing::info;

use cache::{CartRepository, RedisCartRepository, RedisSeatLockStore, SeatLockStore};
use repository::{PaymentLedger, PgStore, ShowingCatalog, UserDirectory};
use services::payment::GatewayCredentials;
use services::{
    CartService, CheckoutOrchestrator, PaymentGatewayClient, PaymentProvider, SeatLockManager,
    SessionIssuer, SessionMigration,
};

pub use error::{BookingError, BookingResult};

/// Concrete stores and provider behind the service layer.
#[derive(Clone)]
pub struct Backends {
    pub seat_locks: Arc<dyn SeatLockStore>,
    pub carts: Arc<dyn CartRepository>,
    pub catalog: Arc<dyn ShowingCatalog>,
    pub ledger: Arc<dyn PaymentLedger>,
    pub users: Arc<dyn UserDirectory>,
    pub provider: Arc<dyn PaymentProvider>,
}

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub carts: CartService,
    pub checkout: CheckoutOrchestrator,
    pub migration: SessionMigration,
    pub sessions: SessionIssuer,
    pub gateway: GatewayCredentials,
    pub users: Arc<dyn UserDirectory>,
    pub ledger: Arc<dyn PaymentLedger>,
    pub provider: Arc<dyn PaymentProvider>,
}

impl AppState {
    /// Connects Postgres and Redis, runs migrations and wires the services.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;
        info!("Database connected");
        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        info!("Redis connected");

        let pg = Arc::new(repository::PgStore::new(db));
        let provider = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker)?;

        let backends = Backends {
            seat_locks: Arc::new(RedisSeatLockStore::new(redis.clone())),
            carts: Arc::new(RedisCartRepository::new(redis)),
            catalog: pg.clone(),
            ledger: pg.clone(),
            users: pg,
            provider: Arc::new(provider),
        };
        Ok(Arc::new(Self::from_backends(config, backends)))
    }

    pub fn from_backends(config: config::Config, backends: Backends) -> Self {
        let hold = config.hold_policy();
        let locks = SeatLockManager::new(backends.seat_locks);
        let carts = CartService::new(
            locks.clone(),
            backends.carts.clone(),
            backends.catalog,
            hold,
            config.hold.max_seats_per_cart,
        );
        let checkout = CheckoutOrchestrator::new(
            carts.clone(),
            locks.clone(),
            backends.ledger.clone(),
            backends.provider.clone(),
            &config.payment.currency,
        );
        let migration = SessionMigration::new(locks, backends.carts, hold);

        Self {
            sessions: SessionIssuer::from_config(&config.session),
            gateway: GatewayCredentials::from_config(&config.payment),
            carts,
            checkout,
            migration,
            users: backends.users,
            ledger: backends.ledger,
            provider: backends.provider,
            config,
        }
    }

    #[cfg(feature = "reconciliation")]
    pub fn reconciliation(&self) -> services::reconciliation::ReconciliationService {
        services::reconciliation::ReconciliationService::new(
            self.ledger.clone(),
            self.provider.clone(),
            self.checkout.clone(),
            std::time::Duration::from_secs(self.config.reconciliation.stale_after_seconds),
            std::time::Duration::from_secs(self.config.reconciliation.orphan_after_seconds),
        )
    }
}
