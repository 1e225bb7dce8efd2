//! Redis key-value cache.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use chainlens_core::error::{CacheError, CacheResult};
use chainlens_core::ports::KeyValueCache;

/// [`KeyValueCache`] backed by Redis `GET` / `SET EX`.
///
/// Cloning is cheap; every clone shares the same multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect and verify the server answers.
    #[instrument(skip_all)]
    pub async fn connect(client: &redis::Client) -> CacheResult<Self> {
        let mut conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        crate::ping(&mut conn)
            .await
            .map_err(|e| CacheError::ConnectionError(format!("ping failed: {e}")))?;

        info!("🗄️ Redis cache connected");
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::CommandError(format!("GET {key}: {e}")))
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        // SET EX rejects 0
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| CacheError::CommandError(format!("SET {key}: {e}")))
    }
}
