use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{CompletionOutcome, NewReservation, PaymentLedger, ShowingCatalog, UserDirectory};
use crate::database::Database;
use crate::models::{Payment, PaymentStatus, Reservation, SeatInfo, ShowingDetails, User};

const PAYMENT_COLUMNS: &str = "id, user_id, amount, currency, status, checkout_reference, \
     error_message, paid_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    db: Database,
}

impl PgStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ShowingCatalog for PgStore {
    async fn showing_details(&self, showing_id: i64) -> sqlx::Result<Option<ShowingDetails>> {
        sqlx::query_as::<_, ShowingDetails>(
            r#"
            SELECT sh.id, m.title AS movie_title, t.name AS theater_name, h.name AS hall_name,
                   sh.starts_at, sh.base_price
            FROM showings sh
            JOIN movies m ON m.id = sh.movie_id
            JOIN halls h ON h.id = sh.hall_id
            JOIN theaters t ON t.id = h.theater_id
            WHERE sh.id = $1
            "#,
        )
        .bind(showing_id)
        .fetch_optional(&self.db.pool)
        .await
    }

    async fn reserved_seat_ids(&self, showing_id: i64) -> sqlx::Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT seat_id FROM reservation_seats WHERE showing_id = $1",
        )
        .bind(showing_id)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn seats_by_ids(&self, showing_id: i64, seat_ids: &[i64]) -> sqlx::Result<Vec<SeatInfo>> {
        sqlx::query_as::<_, SeatInfo>(
            r#"
            SELECT s.id, s.row, s.col, s.seat_type, s.extra_price
            FROM seats s
            JOIN showings sh ON sh.hall_id = s.hall_id
            WHERE sh.id = $1 AND s.id = ANY($2)
            ORDER BY s.row, s.col
            "#,
        )
        .bind(showing_id)
        .bind(seat_ids)
        .fetch_all(&self.db.pool)
        .await
    }
}

#[async_trait]
impl PaymentLedger for PgStore {
    async fn create_payment(&self, payment: &Payment) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, user_id, amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(payment.id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(payment.created_at)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn get_payment(&self, payment_id: Uuid) -> sqlx::Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.db.pool)
        .await
    }

    async fn attach_checkout_reference(&self, payment_id: Uuid, reference: &str) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE payments SET checkout_reference = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(payment_id)
        .bind(reference)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn complete_with_reservation(&self, reservation: NewReservation) -> sqlx::Result<CompletionOutcome> {
        let mut tx = self.db.pool.begin().await?;

        // 1. pending -> completed; строка блокируется до конца транзакции,
        //    поэтому повторная доставка webhook ждёт и видит уже completed
        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'completed', paid_at = NOW(), updated_at = NOW(),
                checkout_reference = COALESCE($2, checkout_reference)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(reservation.payment_id)
        .bind(&reservation.checkout_reference)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let status: Option<PaymentStatus> =
                sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
                    .bind(reservation.payment_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return status
                .map(CompletionOutcome::AlreadyFinalized)
                .ok_or(sqlx::Error::RowNotFound);
        }

        // 2. Сама бронь
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO reservations (id, user_id, showing_id, checkout_reference, payment_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(reservation.user_id)
        .bind(reservation.showing_id)
        .bind(&reservation.checkout_reference)
        .bind(reservation.payment_id)
        .fetch_one(&mut *tx)
        .await?;

        // 3. Места; первичный ключ (showing_id, seat_id) не даст продать место дважды
        sqlx::query(
            r#"
            INSERT INTO reservation_seats (reservation_id, showing_id, seat_id, position)
            SELECT $1, $2, seat_id, position
            FROM unnest($3::bigint[]) WITH ORDINALITY AS t(seat_id, position)
            "#,
        )
        .bind(id)
        .bind(reservation.showing_id)
        .bind(&reservation.seat_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Reservation {} stored for payment {}, {} seats",
            id,
            reservation.payment_id,
            reservation.seat_ids.len()
        );

        Ok(CompletionOutcome::Completed(Reservation {
            id,
            user_id: reservation.user_id,
            showing_id: reservation.showing_id,
            checkout_reference: reservation.checkout_reference,
            payment_id: reservation.payment_id,
            seat_ids: reservation.seat_ids,
            created_at,
        }))
    }

    async fn mark_refunded(&self, payment_id: Uuid, error_message: &str) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'completed', 'canceled')
            "#,
        )
        .bind(payment_id)
        .bind(error_message)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_canceled(&self, payment_id: Uuid, error_message: Option<&str>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'canceled', error_message = COALESCE($2, error_message), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .bind(error_message)
        .execute(&self.db.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("Payment {} was not canceled (status changed?)", payment_id);
        }
        Ok(result.rows_affected() > 0)
    }

    async fn stale_pending(&self, created_before: DateTime<Utc>) -> sqlx::Result<Vec<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' AND created_at < $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        ))
        .bind(created_before)
        .fetch_all(&self.db.pool)
        .await
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_active_by_email(&self, email: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, password_hash, is_active, registered_at
             FROM users
             WHERE email = $1 AND is_active = true",
        )
        .bind(email)
        .fetch_optional(&self.db.pool)
        .await
    }
}
