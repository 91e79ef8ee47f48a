use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::SeatLockStore;
use crate::error::{BookingError, BookingResult};

/// Result of checking a set of holds against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    /// At least one hold is gone and none belongs to someone else.
    Expired,
    /// At least one seat is held by a different session.
    Conflict,
}

impl Ownership {
    /// Owned -> Ok, otherwise the matching error.
    pub fn into_result(self) -> BookingResult<()> {
        match self {
            Ownership::Owned => Ok(()),
            Ownership::Expired => Err(BookingError::Expired),
            Ownership::Conflict => Err(BookingError::Conflict),
        }
    }
}

/// Set-level operations over a [`SeatLockStore`].
///
/// Holds no state of its own; every guarantee comes from the store's atomic
/// primitives.
#[derive(Clone)]
pub struct SeatLockManager {
    store: Arc<dyn SeatLockStore>,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn SeatLockStore>) -> Self {
        Self { store }
    }

    /// Locks all seats to `owner` or fails with [`BookingError::Conflict`]
    /// leaving nothing behind.
    pub async fn acquire_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        owner: &str,
        ttl: Duration,
    ) -> BookingResult<()> {
        let acquired = self.store.acquire_all(showing_id, seat_ids, owner, ttl).await?;
        if !acquired {
            debug!(showing_id, ?seat_ids, "seat lock conflict");
            return Err(BookingError::Conflict);
        }
        debug!(showing_id, ?seat_ids, owner, "seats locked");
        Ok(())
    }

    /// Best effort. A failed release is logged; the keys expire on their own.
    pub async fn release_all(&self, showing_id: i64, seat_ids: &[i64]) {
        if let Err(e) = self.store.release_all(showing_id, seat_ids).await {
            warn!(
                "Failed to release {} seat locks for showing {}: {:?}",
                seat_ids.len(),
                showing_id,
                e
            );
        }
    }

    pub async fn verify_ownership(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        session_id: &str,
    ) -> BookingResult<Ownership> {
        if seat_ids.is_empty() {
            return Ok(Ownership::Expired);
        }

        let owners = self.store.owners(showing_id, seat_ids).await?;
        let mut ownership = Ownership::Owned;
        for owner in owners {
            match owner {
                Some(owner) if owner == session_id => {}
                Some(_) => return Ok(Ownership::Conflict),
                None => ownership = Ownership::Expired,
            }
        }
        Ok(ownership)
    }

    /// Moves every hold from `from` to `to` if all are still owned by `from`.
    pub async fn migrate_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        from: &str,
        to: &str,
        ttl: Duration,
    ) -> BookingResult<bool> {
        Ok(self
            .store
            .migrate_all(showing_id, seat_ids, from, to, ttl)
            .await?)
    }

    pub async fn held_seats(&self, showing_id: i64) -> BookingResult<Vec<i64>> {
        Ok(self.store.held_seats(showing_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySeatLockStore;

    fn manager() -> (SeatLockManager, Arc<MemorySeatLockStore>) {
        let store = Arc::new(MemorySeatLockStore::new());
        (SeatLockManager::new(store.clone()), store)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn concurrent_overlapping_acquisitions_have_one_winner() {
        let (locks, _) = manager();
        let mut handles = Vec::new();
        for i in 0..16 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let seats = [i % 4, 10, 11];
                locks.acquire_all(1, &seats, &format!("session-{}", i), TTL).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(BookingError::Conflict) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn failed_acquisition_leaves_nothing_locked() {
        let (locks, store) = manager();
        locks.acquire_all(1, &[3], "holder", TTL).await.unwrap();

        let err = locks.acquire_all(1, &[1, 2, 3], "loser", TTL).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict));
        assert_eq!(store.live_locks(), 1);

        locks.release_all(1, &[3]).await;
        locks.acquire_all(1, &[1, 2, 3], "third", TTL).await.unwrap();
    }

    #[tokio::test]
    async fn expired_hold_is_acquirable_without_cleanup() {
        let (locks, _) = manager();
        locks
            .acquire_all(1, &[1, 2], "first", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        locks.acquire_all(1, &[1, 2], "second", TTL).await.unwrap();
    }

    #[tokio::test]
    async fn verify_distinguishes_expired_from_conflict() {
        let (locks, _) = manager();
        locks.acquire_all(1, &[1, 2], "me", TTL).await.unwrap();
        assert_eq!(
            locks.verify_ownership(1, &[1, 2], "me").await.unwrap(),
            Ownership::Owned
        );
        assert_eq!(
            locks.verify_ownership(1, &[1, 2, 3], "me").await.unwrap(),
            Ownership::Expired
        );

        locks.acquire_all(1, &[3], "other", TTL).await.unwrap();
        assert_eq!(
            locks.verify_ownership(1, &[1, 2, 3], "me").await.unwrap(),
            Ownership::Conflict
        );
        assert_eq!(
            locks.verify_ownership(1, &[1], "other").await.unwrap(),
            Ownership::Conflict
        );
    }

    #[tokio::test]
    async fn release_failure_is_swallowed() {
        let (locks, store) = manager();
        locks.acquire_all(1, &[1], "me", TTL).await.unwrap();
        store.fail_releases(true);

        locks.release_all(1, &[1]).await;
        assert_eq!(store.live_locks(), 1);
    }
}
