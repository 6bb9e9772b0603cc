//! Redis service used as the session backing store.

use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Redis service providing a connection pool and timeout-bounded primitives.
///
/// Every command issued through the convenience methods is bounded by
/// [`RedisConfig::command_timeout`]; checking a connection out of the pool is
/// bounded by [`RedisConfig::connection_timeout`].
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Create a new Redis service.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self { config, pool })
    }

    /// Create from an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self { config, pool }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut *conn))
            .await?;
        Ok(())
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    /// Get the raw bytes stored at `key`.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.get().await?;
        let value: Option<Vec<u8>> = self.bounded("GET", conn.get(key)).await?;
        debug!(key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    /// Store raw bytes at `key`, expiring after `ttl`.
    ///
    /// TTLs are rounded up to whole seconds; a zero TTL stores the key for one second.
    pub async fn set_bytes_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.get().await?;
        let _: () = self
            .bounded("SETEX", conn.set_ex(key, value, ttl_secs(ttl)))
            .await?;
        debug!(key, bytes = value.len(), ttl_secs = ttl_secs(ttl), "Redis SETEX");
        Ok(())
    }

    /// Delete a key.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.get().await?;
        let deleted: u32 = self.bounded("DEL", conn.del(key)).await?;
        Ok(deleted > 0)
    }

    /// Set expiration on a key. Returns `false` when the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get().await?;
        let result: bool = self
            .bounded("EXPIRE", conn.expire(key, expire_secs(ttl)))
            .await?;
        Ok(result)
    }

    async fn bounded<T, F>(&self, command: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let timeout = self.config.command_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result.map_err(RedisError::from),
            Err(_) => Err(RedisError::Timeout { command, timeout }),
        }
    }
}

/// Longest TTL sent to Redis, about 136 years. Redis rejects expiry times
/// that overflow its millisecond clock.
const MAX_TTL_SECS: u64 = u32::MAX as u64;

fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl
        .as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.clamp(1, MAX_TTL_SECS)
}

fn expire_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX)
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(20 * 60)), 1200);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_unbounded_ttl_is_clamped() {
        assert_eq!(ttl_secs(Duration::MAX), MAX_TTL_SECS);
        assert_eq!(ttl_secs(Duration::from_secs(u64::MAX)), MAX_TTL_SECS);
        assert!(expire_secs(Duration::MAX) > 0);
        assert_eq!(expire_secs(Duration::from_secs(90)), 90);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_bytes_round_trip() {
        let config = RedisConfig::builder()
            .url("redis://localhost:6379")
            .build();

        let redis = RedisService::new(config).await.unwrap();

        redis
            .set_bytes_ex("armature_redis_test_key", b"payload", Duration::from_secs(30))
            .await
            .unwrap();
        let value = redis.get_bytes("armature_redis_test_key").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"payload"[..]));

        assert!(redis.delete("armature_redis_test_key").await.unwrap());
        assert_eq!(redis.get_bytes("armature_redis_test_key").await.unwrap(), None);
    }
}
