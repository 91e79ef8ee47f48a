use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::seat_locks::SeatLockManager;
use crate::cache::CartRepository;
use crate::config::HoldPolicy;
use crate::error::{BookingError, BookingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated { cart_id: Uuid, ttl: Duration },
    NoCartToMigrate,
}

/// Moves a guest session's cart and holds to the session issued at login.
#[derive(Clone)]
pub struct SessionMigration {
    locks: SeatLockManager,
    carts: Arc<dyn CartRepository>,
    hold: HoldPolicy,
}

impl SessionMigration {
    pub fn new(locks: SeatLockManager, carts: Arc<dyn CartRepository>, hold: HoldPolicy) -> Self {
        Self { locks, carts, hold }
    }

    pub async fn migrate_locks(&self, old_session_id: &str, new_session_id: &str) -> BookingResult<MigrationOutcome> {
        if old_session_id == new_session_id {
            return Err(BookingError::Validation("session was not rotated".into()));
        }

        let Some(cart_id) = self.carts.cart_id_for_session(old_session_id).await? else {
            debug!(old_session_id, "no cart to migrate");
            return Ok(MigrationOutcome::NoCartToMigrate);
        };
        let Some(mut cart) = self.carts.get(cart_id).await? else {
            debug!(old_session_id, %cart_id, "cart already expired");
            return Ok(MigrationOutcome::NoCartToMigrate);
        };
        if cart.owner_session_id != old_session_id {
            debug!(old_session_id, %cart_id, "cart already owned by another session");
            return Ok(MigrationOutcome::NoCartToMigrate);
        }
        let remaining = match self.carts.remaining_ttl(cart_id).await? {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Ok(MigrationOutcome::NoCartToMigrate),
        };

        let ttl = self.hold.migrated_ttl(remaining);
        let seat_ids = cart.seat_ids();
        let moved = self
            .locks
            .migrate_all(cart.showing_id, &seat_ids, old_session_id, new_session_id, ttl)
            .await?;
        if !moved {
            warn!(
                "Seat holds of cart {} changed hands during migration, nothing moved",
                cart_id
            );
            return Err(BookingError::Conflict);
        }

        // Старый указатель истечёт сам
        cart.owner_session_id = new_session_id.to_string();
        self.carts.replace(&cart, ttl).await?;
        self.carts.point_session(new_session_id, cart_id, ttl).await?;

        info!(
            "Cart {} migrated to new session: {} seats, hold {:?}",
            cart_id,
            seat_ids.len(),
            ttl
        );
        Ok(MigrationOutcome::Migrated { cart_id, ttl })
    }
}
