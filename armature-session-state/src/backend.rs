//! Key-value backing store contract.

use crate::error::SessionResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Byte-oriented key-value store that holds serialized session items.
#[async_trait]
pub trait SessionBackendStore: Send + Sync {
    /// Get the bytes stored at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Store `value` at `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SessionResult<()>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> SessionResult<()>;

    /// Reset the expiry of `key`. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool>;
}

#[async_trait]
impl<B: SessionBackendStore + ?Sized> SessionBackendStore for Arc<B> {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SessionResult<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        (**self).delete(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
        (**self).expire(key, ttl).await
    }
}

// Roughly 30 years; longer TTLs are treated as this.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(FAR_FUTURE)).unwrap_or(now)
}

#[derive(Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process backing store.
///
/// Useful for tests and single-node deployments. Expired entries are
/// treated as absent and dropped on the next write.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionBackendStore for MemoryBackend {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let data = self.data.read().await;
        Ok(data
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SessionResult<()> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        data.retain(|_, entry| entry.is_live(now));
        data.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
        let now = Instant::now();
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = expiry(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
