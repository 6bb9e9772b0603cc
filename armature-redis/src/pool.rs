//! Redis connection pool.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

/// Type alias for the connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A pooled Redis connection.
pub struct RedisConnection<'a> {
    conn: PooledConnection<'a, RedisConnectionManager>,
}

impl<'a> RedisConnection<'a> {
    /// Create a new connection wrapper.
    pub fn new(conn: PooledConnection<'a, RedisConnectionManager>) -> Self {
        Self { conn }
    }
}

impl Deref for RedisConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for RedisConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Builder for creating Redis connection pools.
pub struct RedisPoolBuilder {
    config: RedisConfig,
}

impl RedisPoolBuilder {
    /// Create a new pool builder.
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    /// Build the connection pool.
    ///
    /// Connections are checked out under the configured connection timeout,
    /// and the pool is verified with a `PING` before it is handed back.
    pub async fn build(self) -> Result<RedisPool> {
        let manager = RedisConnectionManager::new(self.config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        {
            let mut conn = pool.get().await?;
            let cmd = redis::cmd("PING");
            let ping = cmd.query_async::<String>(&mut *conn);
            tokio::time::timeout(self.config.command_timeout, ping)
                .await
                .map_err(|_| RedisError::Timeout {
                    command: "PING",
                    timeout: self.config.command_timeout,
                })?
                .map_err(|e| RedisError::Connection(e.to_string()))?;
        }

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.url,
            database = ?self.config.database,
            "Redis connection pool created"
        );

        Ok(pool)
    }
}
