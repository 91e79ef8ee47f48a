use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use super::{cart_key, session_cart_key, ttl_millis, CartRepository};
use crate::error::BookingResult;
use crate::models::Cart;
use crate::redis_client::RedisClient;

/// Carts as JSON strings under `cart:{id}`, indexed by `session:{sid}:cart`.
#[derive(Clone)]
pub struct RedisCartRepository {
    redis: RedisClient,
}

impl RedisCartRepository {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl CartRepository for RedisCartRepository {
    async fn save(&self, cart: &Cart, ttl: Duration) -> BookingResult<bool> {
        let data = serde_json::to_string(cart)?;
        let ttl_ms = ttl_millis(ttl);
        let key = cart_key(cart.id);

        let mut conn = self.redis.connection();
        // Корзина пишется до указателя: читатель не должен увидеть указатель
        // на ещё не записанную корзину
        let _: () = conn.pset_ex(&key, data, ttl_ms).await?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(session_cart_key(&cart.owner_session_id))
            .arg(cart.id.to_string())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            let _: () = conn.del(&key).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn get(&self, cart_id: Uuid) -> BookingResult<Option<Cart>> {
        let mut conn = self.redis.connection();
        let data: Option<String> = conn.get(cart_key(cart_id)).await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn cart_id_for_session(&self, session_id: &str) -> BookingResult<Option<Uuid>> {
        let mut conn = self.redis.connection();
        let raw: Option<String> = conn.get(session_cart_key(session_id)).await?;
        // битый указатель считаем отсутствующим
        Ok(raw.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    async fn remaining_ttl(&self, cart_id: Uuid) -> BookingResult<Option<Duration>> {
        let mut conn = self.redis.connection();
        // -2: ключа нет, -1: ключ без TTL
        let pttl: i64 = conn.pttl(cart_key(cart_id)).await?;
        if pttl < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(pttl as u64)))
    }

    async fn replace(&self, cart: &Cart, ttl: Duration) -> BookingResult<()> {
        let data = serde_json::to_string(cart)?;
        let mut conn = self.redis.connection();
        let _: () = conn.pset_ex(cart_key(cart.id), data, ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn point_session(&self, session_id: &str, cart_id: Uuid, ttl: Duration) -> BookingResult<()> {
        let mut conn = self.redis.connection();
        let _: () = conn
            .pset_ex(session_cart_key(session_id), cart_id.to_string(), ttl_millis(ttl))
            .await?;
        Ok(())
    }

    async fn clear_session(&self, session_id: &str) -> BookingResult<()> {
        let mut conn = self.redis.connection();
        let _: () = conn.del(session_cart_key(session_id)).await?;
        Ok(())
    }

    async fn delete(&self, cart_id: Uuid, session_id: &str) -> BookingResult<()> {
        let mut conn = self.redis.connection();
        let _: () = redis::pipe()
            .atomic()
            .del(cart_key(cart_id))
            .ignore()
            .del(session_cart_key(session_id))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
