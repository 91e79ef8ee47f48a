//! Ephemeral state: seat locks and cart snapshots.
//!
//! Both live in Redis and expire on their own. Nothing here is durable; losing
//! the store just makes every showing fully available again.

use async_trait::async_trait;
use redis::RedisResult;
use std::time::Duration;
use uuid::Uuid;

use crate::error::BookingResult;
use crate::models::Cart;

pub mod carts;
pub mod memory;
pub mod seat_locks;

pub use carts::RedisCartRepository;
pub use memory::{MemoryCartRepository, MemorySeatLockStore};
pub use seat_locks::RedisSeatLockStore;

/// Key/value store with per-key TTL holding one owner per (showing, seat).
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Locks every seat for `owner` or none of them.
    ///
    /// Returns `false` when any seat is already held; in that case no key of
    /// the batch was written.
    async fn acquire_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        owner: &str,
        ttl: Duration,
    ) -> RedisResult<bool>;

    /// Deletes the lock keys and drops the seats from the held set.
    async fn release_all(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<()>;

    /// Current owner of each seat, in input order. `None` means free.
    async fn owners(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<Vec<Option<String>>>;

    /// Re-points every lock from `from` to `to` with a fresh TTL, only if all
    /// of them are still owned by `from`. Returns `false` and writes nothing
    /// otherwise.
    async fn migrate_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> RedisResult<bool>;

    /// Seats with a live lock, for availability views.
    async fn held_seats(&self, showing_id: i64) -> RedisResult<Vec<i64>>;
}

/// Cart snapshots keyed by id and indexed by owning session.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Writes the cart and claims its owner session's index entry, both with
    /// `ttl`. Returns `false` when the session already points at a cart; the
    /// new cart is not kept in that case.
    async fn save(&self, cart: &Cart, ttl: Duration) -> BookingResult<bool>;

    async fn get(&self, cart_id: Uuid) -> BookingResult<Option<Cart>>;

    async fn cart_id_for_session(&self, session_id: &str) -> BookingResult<Option<Uuid>>;

    /// Time left on the cart entry. `None` when the entry is gone or has no
    /// expiry.
    async fn remaining_ttl(&self, cart_id: Uuid) -> BookingResult<Option<Duration>>;

    /// Rewrites the cart (owner changed) keeping it alive for `ttl`.
    async fn replace(&self, cart: &Cart, ttl: Duration) -> BookingResult<()>;

    async fn point_session(&self, session_id: &str, cart_id: Uuid, ttl: Duration) -> BookingResult<()>;

    async fn clear_session(&self, session_id: &str) -> BookingResult<()>;

    /// Removes the cart and its session index entry.
    async fn delete(&self, cart_id: Uuid, session_id: &str) -> BookingResult<()>;
}

// Ключи в одном hash slot, чтобы скрипты работали и в кластере
pub(crate) fn seat_lock_key(showing_id: i64, seat_id: i64) -> String {
    format!("{}{}", seat_lock_prefix(showing_id), seat_id)
}

pub(crate) fn seat_lock_prefix(showing_id: i64) -> String {
    format!("seat_lock:{{showing:{}}}:", showing_id)
}

pub(crate) fn held_set_key(showing_id: i64) -> String {
    format!("held:{{showing:{}}}", showing_id)
}

pub(crate) fn cart_key(cart_id: Uuid) -> String {
    format!("cart:{}", cart_id)
}

pub(crate) fn session_cart_key(session_id: &str) -> String {
    format!("session:{}:cart", session_id)
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
