use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use super::{DurableStore, StoreError};

// ============================================================================
// Redis Key/Value Store
// ============================================================================
//
// Backs the rate-limit counters: the only state shared across actors, small,
// and naturally expiring. Uses one multiplexed connection cloned per call.
//
// ============================================================================

#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::unavailable)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::unavailable)?;

        tracing::info!(url = %url, "Connected to Redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(StoreError::unavailable)
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(StoreError::unavailable),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(StoreError::unavailable),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(StoreError::unavailable)
    }
}
