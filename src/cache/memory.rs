//! In-process stores with the same contracts as the Redis ones.
//!
//! Each call takes the store mutex once, which gives the same all-or-nothing
//! behaviour a Lua script gives on the server. Used by tests and local runs
//! without Redis.

use async_trait::async_trait;
use redis::{ErrorKind, RedisError, RedisResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::{CartRepository, SeatLockStore};
use crate::error::BookingResult;
use crate::models::Cart;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_live(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(what: &'static str) -> RedisError {
    RedisError::from((ErrorKind::IoError, what))
}

#[derive(Default)]
struct LockState {
    locks: HashMap<(i64, i64), Entry<String>>,
    held: HashMap<i64, BTreeSet<i64>>,
}

impl LockState {
    fn owner(&self, showing_id: i64, seat_id: i64) -> Option<&str> {
        self.locks
            .get(&(showing_id, seat_id))
            .filter(|e| e.is_live())
            .map(|e| e.value.as_str())
    }
}

#[derive(Default)]
pub struct MemorySeatLockStore {
    state: Mutex<LockState>,
    fail_releases: AtomicBool,
}

impl MemorySeatLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `release_all` fail until switched off.
    pub fn fail_releases(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Number of live lock entries, across all showings.
    pub fn live_locks(&self) -> usize {
        lock(&self.state).locks.values().filter(|e| e.is_live()).count()
    }

    pub fn remaining_ttl(&self, showing_id: i64, seat_id: i64) -> Option<Duration> {
        lock(&self.state)
            .locks
            .get(&(showing_id, seat_id))
            .filter(|e| e.is_live())
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl SeatLockStore for MemorySeatLockStore {
    async fn acquire_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        owner: &str,
        ttl: Duration,
    ) -> RedisResult<bool> {
        let mut state = lock(&self.state);
        if seat_ids.iter().any(|id| state.owner(showing_id, *id).is_some()) {
            return Ok(false);
        }
        for seat_id in seat_ids {
            state
                .locks
                .insert((showing_id, *seat_id), Entry::new(owner.to_string(), ttl));
            state.held.entry(showing_id).or_default().insert(*seat_id);
        }
        Ok(true)
    }

    async fn release_all(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<()> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(injected("release failure"));
        }
        let mut state = lock(&self.state);
        for seat_id in seat_ids {
            state.locks.remove(&(showing_id, *seat_id));
            if let Some(held) = state.held.get_mut(&showing_id) {
                held.remove(seat_id);
            }
        }
        Ok(())
    }

    async fn owners(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<Vec<Option<String>>> {
        let state = lock(&self.state);
        Ok(seat_ids
            .iter()
            .map(|id| state.owner(showing_id, *id).map(str::to_string))
            .collect())
    }

    async fn migrate_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> RedisResult<bool> {
        if seat_ids.is_empty() {
            return Ok(false);
        }
        let mut state = lock(&self.state);
        if seat_ids.iter().any(|id| state.owner(showing_id, *id) != Some(from)) {
            return Ok(false);
        }
        for seat_id in seat_ids {
            state
                .locks
                .insert((showing_id, *seat_id), Entry::new(to.to_string(), ttl));
        }
        Ok(true)
    }

    async fn held_seats(&self, showing_id: i64) -> RedisResult<Vec<i64>> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let Some(held) = state.held.get_mut(&showing_id) else {
            return Ok(Vec::new());
        };
        let locks = &state.locks;
        held.retain(|id| locks.get(&(showing_id, *id)).is_some_and(|e| e.is_live()));
        Ok(held.iter().copied().collect())
    }
}

#[derive(Default)]
struct CartState {
    carts: HashMap<Uuid, Entry<Cart>>,
    sessions: HashMap<String, Entry<Uuid>>,
}

#[derive(Default)]
pub struct MemoryCartRepository {
    state: Mutex<CartState>,
    fail_saves: AtomicBool,
}

impl MemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `save` fail until switched off.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Drops the cart entry but leaves the session pointer, as an expiry would.
    pub fn expire_cart(&self, cart_id: Uuid) {
        lock(&self.state).carts.remove(&cart_id);
    }
}

#[async_trait]
impl CartRepository for MemoryCartRepository {
    async fn save(&self, cart: &Cart, ttl: Duration) -> BookingResult<bool> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(injected("save failure").into());
        }
        let mut state = lock(&self.state);
        if state
            .sessions
            .get(&cart.owner_session_id)
            .is_some_and(|e| e.is_live())
        {
            return Ok(false);
        }
        state.carts.insert(cart.id, Entry::new(cart.clone(), ttl));
        state
            .sessions
            .insert(cart.owner_session_id.clone(), Entry::new(cart.id, ttl));
        Ok(true)
    }

    async fn get(&self, cart_id: Uuid) -> BookingResult<Option<Cart>> {
        let state = lock(&self.state);
        Ok(state
            .carts
            .get(&cart_id)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    async fn cart_id_for_session(&self, session_id: &str) -> BookingResult<Option<Uuid>> {
        let state = lock(&self.state);
        Ok(state
            .sessions
            .get(session_id)
            .filter(|e| e.is_live())
            .map(|e| e.value))
    }

    async fn remaining_ttl(&self, cart_id: Uuid) -> BookingResult<Option<Duration>> {
        let state = lock(&self.state);
        Ok(state
            .carts
            .get(&cart_id)
            .filter(|e| e.is_live())
            .map(|e| e.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn replace(&self, cart: &Cart, ttl: Duration) -> BookingResult<()> {
        lock(&self.state)
            .carts
            .insert(cart.id, Entry::new(cart.clone(), ttl));
        Ok(())
    }

    async fn point_session(&self, session_id: &str, cart_id: Uuid, ttl: Duration) -> BookingResult<()> {
        lock(&self.state)
            .sessions
            .insert(session_id.to_string(), Entry::new(cart_id, ttl));
        Ok(())
    }

    async fn clear_session(&self, session_id: &str) -> BookingResult<()> {
        lock(&self.state).sessions.remove(session_id);
        Ok(())
    }

    async fn delete(&self, cart_id: Uuid, session_id: &str) -> BookingResult<()> {
        let mut state = lock(&self.state);
        state.carts.remove(&cart_id);
        state.sessions.remove(session_id);
        Ok(())
    }
}
