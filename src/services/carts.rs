use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::compensation::{Compensation, CompensationContext, CompensationLog};
use super::seat_locks::SeatLockManager;
use crate::cache::CartRepository;
use crate::config::HoldPolicy;
use crate::error::{BookingError, BookingResult};
use crate::models::{Cart, SeatInfo, ShowingDetails};
use crate::repository::ShowingCatalog;

/// Cart lifecycle: hold seats, snapshot them, let them go.
#[derive(Clone)]
pub struct CartService {
    locks: SeatLockManager,
    carts: Arc<dyn CartRepository>,
    catalog: Arc<dyn ShowingCatalog>,
    hold: HoldPolicy,
    max_seats: usize,
}

impl CartService {
    pub fn new(
        locks: SeatLockManager,
        carts: Arc<dyn CartRepository>,
        catalog: Arc<dyn ShowingCatalog>,
        hold: HoldPolicy,
        max_seats: usize,
    ) -> Self {
        Self { locks, carts, catalog, hold, max_seats }
    }

    pub fn hold_policy(&self) -> HoldPolicy {
        self.hold
    }

    /// The session's live cart.
    ///
    /// A pointer to a cart that expired, or that has since moved to another
    /// session, is dropped on the way.
    pub async fn resolve_cart(&self, session_id: &str) -> BookingResult<Option<Cart>> {
        let Some(cart_id) = self.carts.cart_id_for_session(session_id).await? else {
            return Ok(None);
        };

        match self.carts.get(cart_id).await? {
            Some(cart) if cart.owner_session_id == session_id => Ok(Some(cart)),
            stale => {
                debug!(
                    session_id,
                    %cart_id,
                    expired = stale.is_none(),
                    "dropping stale session cart pointer"
                );
                self.carts.clear_session(session_id).await?;
                Ok(None)
            }
        }
    }

    pub async fn cart_by_id(&self, cart_id: Uuid) -> BookingResult<Option<Cart>> {
        Ok(self.carts.get(cart_id).await?)
    }

    pub async fn create_cart(
        &self,
        session_id: &str,
        showing_id: i64,
        seat_ids: &[i64],
    ) -> BookingResult<Cart> {
        let seat_ids = normalize_seat_ids(seat_ids, self.max_seats)?;

        // 1. Одна корзина на сессию
        if self.resolve_cart(session_id).await?.is_some() {
            return Err(BookingError::CartAlreadyExists);
        }

        let showing = self
            .catalog
            .showing_details(showing_id)
            .await?
            .ok_or(BookingError::NotFound("showing"))?;

        // 2. Проданные места выигрывают у новых holds
        let reserved = self.catalog.reserved_seat_ids(showing_id).await?;
        if seat_ids.iter().any(|id| reserved.contains(id)) {
            info!(showing_id, ?seat_ids, "requested seats already sold");
            return Err(BookingError::SeatAlreadyReserved);
        }

        // 3. Все запрошенные места должны существовать в зале сеанса
        let seats = self.catalog.seats_by_ids(showing_id, &seat_ids).await?;
        let seats = in_request_order(&seat_ids, seats).ok_or(BookingError::NotFound("seat"))?;

        // 4-6 run detached so a dropped request can't stop between
        // lock acquisition and cart persistence.
        let service = self.clone();
        let owner = session_id.to_string();
        tokio::spawn(async move { service.lock_and_persist(owner, showing, seat_ids, seats).await })
            .await
            .map_err(|e| BookingError::Internal(format!("cart creation task failed: {}", e)))?
    }

    async fn lock_and_persist(
        &self,
        session_id: String,
        showing: ShowingDetails,
        seat_ids: Vec<i64>,
        seats: Vec<SeatInfo>,
    ) -> BookingResult<Cart> {
        let showing_id = showing.id;
        let ttl = self.hold.ttl();

        match self.locks.acquire_all(showing_id, &seat_ids, &session_id, ttl).await {
            Ok(()) => {}
            Err(BookingError::Conflict) => {
                info!(showing_id, ?seat_ids, "seats held by another session");
                return Err(BookingError::SeatAlreadyReserved);
            }
            Err(e) => return Err(e),
        }

        let mut log = CompensationLog::new();
        log.record(Compensation::ReleaseLocks { showing_id, seat_ids });

        let cart = Cart::new(&session_id, showing, seats);
        let failure = match self.carts.save(&cart, ttl).await {
            Ok(true) => None,
            // параллельный запрос той же сессии успел раньше
            Ok(false) => {
                info!(session_id, showing_id, "session claimed a cart concurrently");
                Some(BookingError::CartAlreadyExists)
            }
            Err(e) => {
                error!("Failed to persist cart {} for showing {}: {:?}", cart.id, showing_id, e);
                Some(e)
            }
        };
        if let Some(err) = failure {
            let ctx = CompensationContext { locks: &self.locks, ledger: None, provider: None };
            if let Err(unwind_err) = log.unwind(&ctx, "cart persistence failed").await {
                error!("Cart compensation failed: {}", unwind_err);
            }
            return Err(err);
        }
        log.discharge();

        info!(
            "Cart {} created: showing={}, seats={}, total={}",
            cart.id,
            showing_id,
            cart.seats.len(),
            cart.total_price
        );
        Ok(cart)
    }

    pub async fn delete_cart(&self, session_id: &str, showing_id: i64) -> BookingResult<()> {
        let cart = self
            .resolve_cart(session_id)
            .await?
            .ok_or(BookingError::NotFound("cart"))?;

        if cart.showing_id != showing_id {
            debug!(
                session_id,
                cart_showing = cart.showing_id,
                requested = showing_id,
                "cart belongs to another showing"
            );
            return Err(BookingError::NotFound("cart"));
        }

        self.locks.release_all(cart.showing_id, &cart.seat_ids()).await;
        self.carts.delete(cart.id, session_id).await?;
        info!("Cart {} deleted by session {}", cart.id, session_id);
        Ok(())
    }

    /// Current cart with the hold time left on it.
    pub async fn current_cart(&self, session_id: &str) -> BookingResult<Option<(Cart, Duration)>> {
        let Some(cart) = self.resolve_cart(session_id).await? else {
            return Ok(None);
        };
        Ok(self
            .carts
            .remaining_ttl(cart.id)
            .await?
            .map(|remaining| (cart, remaining)))
    }

    pub async fn held_seats(&self, showing_id: i64) -> BookingResult<Vec<i64>> {
        let mut held = self.locks.held_seats(showing_id).await?;
        held.sort_unstable();
        Ok(held)
    }

    /// Post-sale cleanup. Failures are logged; TTL takes care of the rest.
    pub async fn discard(&self, cart: &Cart, session_id: &str) {
        self.locks.release_all(cart.showing_id, &cart.seat_ids()).await;
        if let Err(e) = self.carts.delete(cart.id, session_id).await {
            warn!("Failed to delete cart {} after checkout: {:?}", cart.id, e);
        }
    }
}

/// Dedupes while keeping first-seen order.
fn normalize_seat_ids(seat_ids: &[i64], max_seats: usize) -> BookingResult<Vec<i64>> {
    let mut seen = HashSet::with_capacity(seat_ids.len());
    let ids: Vec<i64> = seat_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    if ids.is_empty() {
        return Err(BookingError::Validation("at least one seat is required".into()));
    }
    if ids.len() > max_seats {
        return Err(BookingError::Validation(format!(
            "at most {} seats per cart",
            max_seats
        )));
    }
    if let Some(bad) = ids.iter().find(|id| **id <= 0) {
        return Err(BookingError::Validation(format!("invalid seat id {}", bad)));
    }
    Ok(ids)
}

fn in_request_order(seat_ids: &[i64], seats: Vec<SeatInfo>) -> Option<Vec<SeatInfo>> {
    if seats.len() != seat_ids.len() {
        return None;
    }
    let mut by_id: HashMap<i64, SeatInfo> = seats.into_iter().map(|s| (s.id, s)).collect();
    seat_ids.iter().map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCartRepository, MemorySeatLockStore};
    use crate::models::Reservation;
    use crate::repository::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixture {
        service: CartService,
        locks: Arc<MemorySeatLockStore>,
        carts: Arc<MemoryCartRepository>,
        store: Arc<MemoryStore>,
    }

    fn seat(id: i64, extra: rust_decimal::Decimal) -> SeatInfo {
        SeatInfo {
            id,
            row: 1,
            column: id as i32,
            seat_type: if extra.is_zero() { "standard".into() } else { "vip".into() },
            extra_price: extra,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_showing(
            ShowingDetails {
                id: 1,
                movie_title: "Alien".into(),
                theater_name: "Odeon".into(),
                hall_name: "Hall 3".into(),
                starts_at: Utc::now(),
                base_price: dec!(50),
            },
            vec![seat(1, dec!(0)), seat(2, dec!(15)), seat(3, dec!(10)), seat(4, dec!(0))],
        );
        let locks = Arc::new(MemorySeatLockStore::new());
        let carts = Arc::new(MemoryCartRepository::new());
        let service = CartService::new(
            SeatLockManager::new(locks.clone()),
            carts.clone(),
            store.clone(),
            HoldPolicy::default(),
            10,
        );
        Fixture { service, locks, carts, store }
    }

    #[tokio::test]
    async fn creates_priced_cart_and_locks_seats() {
        let f = fixture();
        let cart = f.service.create_cart("A", 1, &[3, 1, 2, 3]).await.unwrap();

        assert_eq!(cart.seat_ids(), vec![3, 1, 2]);
        assert_eq!(cart.total_price, dec!(175));
        assert_eq!(f.locks.live_locks(), 3);
        assert_eq!(f.service.held_seats(1).await.unwrap(), vec![1, 2, 3]);

        let (current, remaining) = f.service.current_cart("A").await.unwrap().unwrap();
        assert_eq!(current.id, cart.id);
        assert!(remaining <= HoldPolicy::default().ttl());
    }

    #[tokio::test]
    async fn second_cart_for_same_session_is_rejected() {
        let f = fixture();
        f.service.create_cart("A", 1, &[1]).await.unwrap();
        let err = f.service.create_cart("A", 1, &[2]).await.unwrap_err();
        assert!(matches!(err, BookingError::CartAlreadyExists));
    }

    /// Index lookups always miss, as they do for requests that both read the
    /// index before either wrote it.
    struct RacingIndex(Arc<MemoryCartRepository>);

    #[async_trait::async_trait]
    impl CartRepository for RacingIndex {
        async fn save(&self, cart: &Cart, ttl: Duration) -> BookingResult<bool> {
            self.0.save(cart, ttl).await
        }
        async fn get(&self, cart_id: Uuid) -> BookingResult<Option<Cart>> {
            self.0.get(cart_id).await
        }
        async fn cart_id_for_session(&self, _session_id: &str) -> BookingResult<Option<Uuid>> {
            Ok(None)
        }
        async fn remaining_ttl(&self, cart_id: Uuid) -> BookingResult<Option<Duration>> {
            self.0.remaining_ttl(cart_id).await
        }
        async fn replace(&self, cart: &Cart, ttl: Duration) -> BookingResult<()> {
            self.0.replace(cart, ttl).await
        }
        async fn point_session(&self, session_id: &str, cart_id: Uuid, ttl: Duration) -> BookingResult<()> {
            self.0.point_session(session_id, cart_id, ttl).await
        }
        async fn clear_session(&self, session_id: &str) -> BookingResult<()> {
            self.0.clear_session(session_id).await
        }
        async fn delete(&self, cart_id: Uuid, session_id: &str) -> BookingResult<()> {
            self.0.delete(cart_id, session_id).await
        }
    }

    #[tokio::test]
    async fn racing_creates_for_one_session_leave_one_cart() {
        let f = fixture();
        let service = CartService::new(
            SeatLockManager::new(f.locks.clone()),
            Arc::new(RacingIndex(f.carts.clone())),
            f.store.clone(),
            HoldPolicy::default(),
            10,
        );

        let first = service.create_cart("A", 1, &[1, 2]).await.unwrap();
        let err = service.create_cart("A", 1, &[3, 4]).await.unwrap_err();
        assert!(matches!(err, BookingError::CartAlreadyExists));

        // места проигравшего запроса свободны сразу
        assert_eq!(f.locks.live_locks(), 2);
        assert_eq!(f.service.held_seats(1).await.unwrap(), vec![1, 2]);
        assert_eq!(f.carts.cart_id_for_session("A").await.unwrap(), Some(first.id));
        f.service.create_cart("B", 1, &[3, 4]).await.unwrap();
    }

    #[tokio::test]
    async fn sold_seats_are_rejected_before_locking() {
        let f = fixture();
        f.store.insert_reservation(Reservation {
            id: Uuid::new_v4(),
            user_id: 9,
            showing_id: 1,
            checkout_reference: None,
            payment_id: Uuid::new_v4(),
            seat_ids: vec![2],
            created_at: Utc::now(),
        });

        let err = f.service.create_cart("A", 1, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatAlreadyReserved));
        assert_eq!(f.locks.live_locks(), 0);
    }

    #[tokio::test]
    async fn unknown_seat_is_not_found() {
        let f = fixture();
        let err = f.service.create_cart("A", 1, &[1, 99]).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound("seat")));
        let err = f.service.create_cart("A", 7, &[1]).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound("showing")));
    }

    #[tokio::test]
    async fn held_seat_surfaces_as_already_reserved() {
        let f = fixture();
        f.service.create_cart("A", 1, &[2]).await.unwrap();
        let err = f.service.create_cart("B", 1, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatAlreadyReserved));
        assert_eq!(f.locks.live_locks(), 1);
    }

    #[tokio::test]
    async fn failed_persist_releases_fresh_locks() {
        let f = fixture();
        f.carts.fail_saves(true);

        let err = f.service.create_cart("A", 1, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, BookingError::Redis(_)));
        assert_eq!(f.locks.live_locks(), 0);

        f.carts.fail_saves(false);
        f.service.create_cart("B", 1, &[1, 2]).await.unwrap();
    }

    #[tokio::test]
    async fn delete_requires_matching_showing() {
        let f = fixture();
        f.service.create_cart("A", 1, &[1, 2]).await.unwrap();

        let err = f.service.delete_cart("A", 2).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound("cart")));
        assert_eq!(f.locks.live_locks(), 2);

        f.service.delete_cart("A", 1).await.unwrap();
        assert_eq!(f.locks.live_locks(), 0);
        assert!(f.service.current_cart("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dangling_pointer_is_cleaned_up() {
        let f = fixture();
        let cart = f.service.create_cart("A", 1, &[1]).await.unwrap();
        f.carts.expire_cart(cart.id);

        let err = f.service.delete_cart("A", 1).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound("cart")));
        assert!(f.carts.cart_id_for_session("A").await.unwrap().is_none());

        // сброшенный указатель не мешает новой корзине
        f.service.create_cart("A", 1, &[2]).await.unwrap();
    }

    #[test]
    fn seat_list_validation() {
        assert!(normalize_seat_ids(&[], 10).is_err());
        assert!(normalize_seat_ids(&[1, 0], 10).is_err());
        assert!(normalize_seat_ids(&(1..=11).collect::<Vec<_>>(), 10).is_err());
        assert_eq!(normalize_seat_ids(&[5, 5, 4], 10).unwrap(), vec![5, 4]);
    }
}
