//! Redis backing store.

use crate::backend::SessionBackendStore;
use crate::codec::SessionStateCodec;
use crate::config::SessionStateConfig;
use crate::error::SessionResult;
use crate::fail_soft::FailSoftSessionStore;
use crate::store::KeyValueSessionStore;
use armature_redis::RedisService;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Session store persisting to Redis.
pub type RedisSessionStateStore = KeyValueSessionStore<RedisService>;

/// Fail-soft session store persisting to Redis.
pub type RedisSessionStateProvider = FailSoftSessionStore<RedisSessionStateStore>;

#[async_trait]
impl SessionBackendStore for RedisService {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        Ok(self.get_bytes(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SessionResult<()> {
        Ok(self.set_bytes_ex(key, &value, ttl).await?)
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        RedisService::delete(self, key).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
        Ok(RedisService::expire(self, key, ttl).await?)
    }
}

impl RedisSessionStateProvider {
    /// Connect to Redis and build a fail-soft session store from `config`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use armature_session_state::{RedisSessionStateProvider, SessionStateCodec, SessionStateConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = SessionStateConfig::from_settings([
    ///     ("applicationName", "shop"),
    ///     ("host", "localhost"),
    ///     ("port", "6379"),
    ///     ("databaseId", "2"),
    ///     ("connectionTimeoutInMilliseconds", "2000"),
    ///     ("operationTimeoutInMilliseconds", "500"),
    /// ])?;
    /// let store = RedisSessionStateProvider::connect(config, SessionStateCodec::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: SessionStateConfig, codec: SessionStateCodec) -> SessionResult<Self> {
        let redis = RedisService::new(config.redis_config()).await?;

        info!(
            address = ?config.connection_string(),
            key_prefix = %config.key_prefix(),
            policy = ?config.error_policy(),
            "Redis session state store connected"
        );

        let inner = KeyValueSessionStore::new(redis, codec).with_key_prefix(config.key_prefix());
        Ok(FailSoftSessionStore::new(inner, config.error_policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{RequestContext, SessionStateStore};

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_round_trip() {
        let config = SessionStateConfig::from_settings([
            ("applicationName", "armature_tests"),
            ("host", "localhost"),
            ("port", "6379"),
            ("throwOnError", "true"),
        ])
        .unwrap();
        let store = RedisSessionStateProvider::connect(config, SessionStateCodec::default())
            .await
            .unwrap();
        let ctx = RequestContext::new("req-1");

        store
            .create_uninitialized_item(&ctx, "redis-abc1", Duration::from_secs(60))
            .await
            .unwrap();
        let lookup = store.get_item(&ctx, "redis-abc1").await.unwrap();
        assert!(lookup.item.is_some());
    }
}
