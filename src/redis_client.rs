use redis::{aio::MultiplexedConnection, Client};
use tracing::debug;

/// Shared multiplexed connection for seat locks and carts.
///
/// Cloning is cheap; every clone pipelines over the same socket, so nothing
/// here may rely on WATCH/MULTI connection state.
#[derive(Clone)]
pub struct RedisClient {
    pub conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis answered {}", pong);
        Ok(RedisClient { conn })
    }

    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}
