use async_trait::async_trait;
use redis::{RedisResult, Script};
use std::time::Duration;
use tracing::debug;

use super::{held_set_key, seat_lock_key, seat_lock_prefix, ttl_millis, SeatLockStore};
use crate::redis_client::RedisClient;

// KEYS[1] = held set, KEYS[2..] = lock keys
// ARGV[1] = owner, ARGV[2] = ttl ms, ARGV[3..] = seat ids (same order as lock keys)
const ACQUIRE_ALL: &str = r#"
for i = 2, #KEYS do
    if redis.call('EXISTS', KEYS[i]) == 1 then
        return 0
    end
end
for i = 2, #KEYS do
    redis.call('SET', KEYS[i], ARGV[1], 'PX', ARGV[2])
    redis.call('SADD', KEYS[1], ARGV[i + 1])
end
if redis.call('PTTL', KEYS[1]) < tonumber(ARGV[2]) then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 1
"#;

// KEYS[1] = held set, KEYS[2..] = lock keys
// ARGV[1] = current owner, ARGV[2] = new owner, ARGV[3] = ttl ms
const MIGRATE_ALL: &str = r#"
for i = 2, #KEYS do
    if redis.call('GET', KEYS[i]) ~= ARGV[1] then
        return 0
    end
end
for i = 2, #KEYS do
    redis.call('SET', KEYS[i], ARGV[2], 'PX', ARGV[3])
end
if redis.call('PTTL', KEYS[1]) < tonumber(ARGV[3]) then
    redis.call('PEXPIRE', KEYS[1], ARGV[3])
end
return 1
"#;

// KEYS[1] = held set, ARGV[1] = lock key prefix
const LIVE_HELD: &str = r#"
local live = {}
for _, id in ipairs(redis.call('SMEMBERS', KEYS[1])) do
    if redis.call('EXISTS', ARGV[1] .. id) == 1 then
        table.insert(live, id)
    else
        redis.call('SREM', KEYS[1], id)
    end
end
return live
"#;

/// Seat locks as plain Redis strings `seat_lock:{showing:N}:SEAT -> session id`.
#[derive(Clone)]
pub struct RedisSeatLockStore {
    redis: RedisClient,
    acquire_all: Script,
    migrate_all: Script,
    live_held: Script,
}

impl RedisSeatLockStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            acquire_all: Script::new(ACQUIRE_ALL),
            migrate_all: Script::new(MIGRATE_ALL),
            live_held: Script::new(LIVE_HELD),
        }
    }
}

#[async_trait]
impl SeatLockStore for RedisSeatLockStore {
    async fn acquire_all(
        &self,
        showing_id: i64,
        seat_ids: &[i64],
        owner: &str,
        ttl: Duration,
    ) -> RedisResult<bool> {
        if seat_ids.is_empty() {
            return Ok(true);
        }

        let mut invocation = self.acquire_all.prepare_invoke();
        invocation.key(held_set_key(showing_id));
        for seat_id in seat_ids {
            invocation.key(seat_lock_key(showing_id, *seat_id));
        }
        invocation.arg(owner).arg(ttl_millis(ttl));
        for seat_id in seat_ids {
            invocation.arg(*seat_id);
        }

        let mut conn = self.redis.connection();
        let acquired: i32 = invocation.invoke_async(&mut conn).await?;
        debug!(showing_id, seats = seat_ids.len(), acquired, "acquire_all script finished");
        Ok(acquired == 1)
    }

    async fn release_all(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<()> {
        if seat_ids.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = seat_ids
            .iter()
            .map(|id| seat_lock_key(showing_id, *id))
            .collect();

        let mut conn = self.redis.connection();
        let _: () = redis::pipe()
            .atomic()
            .del(keys)
            .ignore()
            .srem(held_set_key(showing_id), seat_ids.to_vec())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn owners(&self, showing_id: i64, seat_ids: &[i64]) -> RedisResult<Vec<Option<String>>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }

        // явный MGET: ответ всегда массив, даже для одного места
        let mut cmd = redis::cmd("MGET");
        for seat_id in seat_ids {
            cmd.arg(seat_lock_key(showing_id, *seat_id));
        }

        let mut conn = self.redis.connection();
        cmd.query_async(&mut conn).await
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

        let mut invocation = self.migrate_all.prepare_invoke();
        invocation.key(held_set_key(showing_id));
        for seat_id in seat_ids {
            invocation.key(seat_lock_key(showing_id, *seat_id));
        }
        invocation.arg(from).arg(to).arg(ttl_millis(ttl));

        let mut conn = self.redis.connection();
        let migrated: i32 = invocation.invoke_async(&mut conn).await?;
        Ok(migrated == 1)
    }

    async fn held_seats(&self, showing_id: i64) -> RedisResult<Vec<i64>> {
        let mut conn = self.redis.connection();
        let members: Vec<String> = self
            .live_held
            .key(held_set_key(showing_id))
            .arg(seat_lock_prefix(showing_id))
            .invoke_async(&mut conn)
            .await?;

        let mut seats: Vec<i64> = members.iter().filter_map(|m| m.parse().ok()).collect();
        seats.sort_unstable();
        Ok(seats)
    }
}
