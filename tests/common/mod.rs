#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Words;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use showtime_booking::cache::{MemoryCartRepository, MemorySeatLockStore};
use showtime_booking::config::Config;
use showtime_booking::models::{SeatInfo, ShowingDetails, User};
use showtime_booking::repository::MemoryStore;
use showtime_booking::services::payment::{
    CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, ProviderPaymentState,
    ProviderPaymentStatus,
};
use showtime_booking::services::ProviderEvent;
use showtime_booking::{AppState, Backends};

pub const SHOWING: i64 = 1;
pub const USER: i64 = 1;

#[derive(Default)]
struct StubState {
    checkouts: Vec<(String, CheckoutRequest)>,
    refunds: Vec<(String, Decimal)>,
    statuses: HashMap<String, ProviderPaymentStatus>,
    fail_checkout: bool,
    fail_refunds: bool,
}

/// Payment provider double that remembers what it was asked to do.
#[derive(Default)]
pub struct StubProvider {
    state: Mutex<StubState>,
}

impl StubProvider {
    pub fn fail_checkout(&self, fail: bool) {
        self.state.lock().unwrap().fail_checkout = fail;
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.state.lock().unwrap().fail_refunds = fail;
    }

    pub fn set_status(&self, reference: &str, status: ProviderPaymentStatus) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(reference.to_string(), status);
    }

    pub fn refunds(&self) -> Vec<(String, Decimal)> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn checkouts(&self) -> usize {
        self.state.lock().unwrap().checkouts.len()
    }

    /// The notification the provider would send for the latest checkout.
    pub fn last_event(&self, status: ProviderPaymentStatus) -> ProviderEvent {
        let state = self.state.lock().unwrap();
        let (reference, request) = state.checkouts.last().expect("no checkout started");
        ProviderEvent {
            status,
            provider_reference: reference.clone(),
            metadata: request.metadata.to_map(),
        }
    }

    pub fn last_reference(&self) -> String {
        self.state.lock().unwrap().checkouts.last().expect("no checkout started").0.clone()
    }
}

#[async_trait]
impl PaymentProvider for StubProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_checkout {
            return Err(ProviderError::Rejected { code: Some(500), message: "gateway down".into() });
        }
        let reference = format!("gw-{}", state.checkouts.len() + 1);
        state.checkouts.push((reference.clone(), request.clone()));
        state
            .statuses
            .insert(reference.clone(), ProviderPaymentStatus::InProgress);
        Ok(CheckoutSession {
            redirect_url: format!("https://gateway.test/pay/{}", reference),
            reference,
        })
    }

    async fn issue_refund(&self, reference: &str, amount: Decimal) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_refunds {
            return Err(ProviderError::Unavailable);
        }
        state.refunds.push((reference.to_string(), amount));
        state
            .statuses
            .insert(reference.to_string(), ProviderPaymentStatus::Refunded);
        Ok(())
    }

    async fn payment_status(&self, reference: &str) -> Result<ProviderPaymentState, ProviderError> {
        let state = self.state.lock().unwrap();
        let status = *state.statuses.get(reference).ok_or(ProviderError::Unavailable)?;
        let metadata = state
            .checkouts
            .iter()
            .find(|(r, _)| r == reference)
            .map(|(_, req)| req.metadata.to_map())
            .unwrap_or_default();
        Ok(ProviderPaymentState { status, metadata })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub locks: Arc<MemorySeatLockStore>,
    pub carts: Arc<MemoryCartRepository>,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<StubProvider>,
    pub user_email: String,
}

pub fn test_config() -> Config {
    Config::from_pairs([
        ("database.url", "postgres://localhost/unused"),
        ("redis.url", "redis://localhost"),
        ("session.jwt_secret", "integration-secret"),
        ("payment.merchant_id", "cinema"),
        ("payment.merchant_password", "merchant-secret"),
        ("reconciliation.stale_after_seconds", "900"),
        ("reconciliation.orphan_after_seconds", "7200"),
    ])
    .expect("test config")
}

fn seat(id: i64, extra: Decimal) -> SeatInfo {
    SeatInfo {
        id,
        row: ((id - 1) / 10 + 1) as i32,
        column: ((id - 1) % 10 + 1) as i32,
        seat_type: if extra.is_zero() { "standard".into() } else { "comfort".into() },
        extra_price: extra,
    }
}

/// Showing 1 with base price 50 and seats 1..=6; seat 2 costs +15, seat 3 +10.
pub fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let title: Vec<String> = Words(2..4).fake();
    store.add_showing(
        ShowingDetails {
            id: SHOWING,
            movie_title: title.join(" "),
            theater_name: "Odeon".into(),
            hall_name: "Hall 1".into(),
            starts_at: Utc::now() + chrono::Duration::hours(3),
            base_price: dec!(50),
        },
        vec![
            seat(1, dec!(0)),
            seat(2, dec!(15)),
            seat(3, dec!(10)),
            seat(4, dec!(0)),
            seat(5, dec!(0)),
            seat(6, dec!(0)),
        ],
    );

    let user_email: String = SafeEmail().fake();
    store.add_user(User {
        id: USER,
        email: user_email.clone(),
        password_hash: bcrypt::hash("correct horse", 4).expect("hash"),
        is_active: true,
        registered_at: Utc::now(),
    });

    let locks = Arc::new(MemorySeatLockStore::new());
    let carts = Arc::new(MemoryCartRepository::new());
    let provider = Arc::new(StubProvider::default());

    let state = AppState::from_backends(
        test_config(),
        Backends {
            seat_locks: locks.clone(),
            carts: carts.clone(),
            catalog: store.clone(),
            ledger: store.clone(),
            users: store.clone(),
            provider: provider.clone(),
        },
    );

    TestApp { state, locks, carts, store, provider, user_email }
}
