//! Session state store on top of a key-value backing store.
//!
//! Each session item occupies two keys:
//!
//! - `{prefix}{id}` holds the encoded attribute payload.
//! - `{prefix}{id}:state` holds JSON item state: timeout, pending action and
//!   the exclusive lock, if any.
//!
//! Both keys expire after the item timeout. The two writes are not atomic;
//! exclusivity between concurrent requests for the same session relies on
//! the host serializing access through the lock protocol.

use crate::backend::SessionBackendStore;
use crate::codec::{SessionSerializer, SessionStateCodec};
use crate::error::{SessionError, SessionResult};
use crate::traits::{
    ExpireCallback, ItemLookup, LockId, RequestContext, SessionStateActions, SessionStateData,
    SessionStateStore,
};
use crate::value::AttributeBag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

const STATE_SUFFIX: &str = ":state";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    lock_id: LockId,
    locked_at: DateTime<Utc>,
}

impl LockRecord {
    fn acquire() -> Self {
        Self {
            lock_id: LockId::generate(),
            locked_at: Utc::now(),
        }
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.locked_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemState {
    timeout_ms: u64,
    #[serde(default)]
    actions: SessionStateActions,
    #[serde(default)]
    lock: Option<LockRecord>,
}

impl ItemState {
    fn new(timeout: Duration, actions: SessionStateActions) -> Self {
        Self {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            actions,
            lock: None,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn is_held_by_other(&self, lock_id: Option<&LockId>) -> bool {
        match (&self.lock, lock_id) {
            (Some(lock), Some(lock_id)) => lock.lock_id != *lock_id,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Session state store persisting items in a [`SessionBackendStore`].
///
/// # Examples
///
/// ```
/// use armature_session_state::prelude::*;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> SessionResult<()> {
/// let store = KeyValueSessionStore::new(MemoryBackend::new(), SessionStateCodec::default())
///     .with_key_prefix("shop_");
/// let ctx = RequestContext::new("req-1");
///
/// let mut data = store
///     .create_new_store_data(&ctx, Duration::from_secs(1200))
///     .await?
///     .unwrap();
/// data.items.set("visits", 1_i32);
/// store
///     .set_and_release_item_exclusive(&ctx, "abc", &data, None, true)
///     .await?;
///
/// let lookup = store.get_item(&ctx, "abc").await?;
/// assert_eq!(lookup.item.unwrap().items.get::<i32>("visits"), Some(&1));
/// # Ok(())
/// # }
/// ```
pub struct KeyValueSessionStore<B> {
    backend: B,
    codec: SessionStateCodec,
    key_prefix: String,
}

impl<B: SessionBackendStore> KeyValueSessionStore<B> {
    /// Create a store over `backend`, encoding items with `codec`.
    pub fn new(backend: B, codec: SessionStateCodec) -> Self {
        Self {
            backend,
            codec,
            key_prefix: String::new(),
        }
    }

    /// Set the prefix applied to every key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The backing store.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The payload codec.
    pub fn codec(&self) -> &SessionStateCodec {
        &self.codec
    }

    /// Key holding the encoded attributes of session `id`.
    pub fn data_key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn state_key(&self, id: &str) -> String {
        format!("{}{}{}", self.key_prefix, id, STATE_SUFFIX)
    }

    async fn load_state(&self, id: &str) -> SessionResult<Option<ItemState>> {
        match self.backend.get(&self.state_key(id)).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(SessionError::malformed_payload),
            None => Ok(None),
        }
    }

    async fn save_state(&self, id: &str, state: &ItemState) -> SessionResult<()> {
        let bytes = serde_json::to_vec(state).map_err(|e| SessionError::Serialization {
            key: None,
            message: e.to_string(),
        })?;
        self.backend
            .set(&self.state_key(id), bytes, state.timeout())
            .await
    }

    async fn write_item(
        &self,
        id: &str,
        items: &AttributeBag,
        state: &ItemState,
    ) -> SessionResult<()> {
        let payload = self.codec.serialize(items)?;
        self.backend
            .set(&self.data_key(id), payload, state.timeout())
            .await?;
        self.save_state(id, state).await
    }

    async fn fetch(&self, id: &str, exclusive: bool) -> SessionResult<ItemLookup> {
        validate_id(id)?;

        let Some(mut state) = self.load_state(id).await? else {
            debug!(session_id = id, "Session item not found");
            return Ok(ItemLookup::not_found());
        };

        if let Some(lock) = &state.lock {
            debug!(session_id = id, lock_id = %lock.lock_id, "Session item is locked");
            return Ok(ItemLookup::locked(lock.lock_id.clone(), lock.age()));
        }

        let items = match self.backend.get(&self.data_key(id)).await? {
            Some(bytes) => self.codec.deserialize(&bytes)?,
            None => AttributeBag::new(),
        };
        let actions = state.actions;

        let lock_id = if exclusive {
            let lock = LockRecord::acquire();
            let lock_id = lock.lock_id.clone();
            state.lock = Some(lock);
            state.actions = SessionStateActions::None;
            self.save_state(id, &state).await?;
            Some(lock_id)
        } else {
            None
        };

        Ok(ItemLookup {
            item: Some(SessionStateData::new(items, state.timeout())),
            locked: false,
            lock_age: Duration::ZERO,
            lock_id,
            actions,
        })
    }
}

fn validate_id(id: &str) -> SessionResult<()> {
    if id.is_empty() {
        return Err(SessionError::InvalidSessionId(
            "session id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl<B: SessionBackendStore> SessionStateStore for KeyValueSessionStore<B> {
    async fn create_new_store_data(
        &self,
        _ctx: &RequestContext,
        timeout: Duration,
    ) -> SessionResult<Option<SessionStateData>> {
        Ok(Some(SessionStateData::new(AttributeBag::new(), timeout)))
    }

    async fn create_uninitialized_item(
        &self,
        _ctx: &RequestContext,
        id: &str,
        timeout: Duration,
    ) -> SessionResult<()> {
        validate_id(id)?;
        let state = ItemState::new(timeout, SessionStateActions::InitializeItem);
        self.write_item(id, &AttributeBag::new(), &state).await
    }

    async fn get_item(&self, _ctx: &RequestContext, id: &str) -> SessionResult<ItemLookup> {
        self.fetch(id, false).await
    }

    async fn get_item_exclusive(
        &self,
        _ctx: &RequestContext,
        id: &str,
    ) -> SessionResult<ItemLookup> {
        self.fetch(id, true).await
    }

    async fn release_item_exclusive(
        &self,
        _ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
    ) -> SessionResult<()> {
        validate_id(id)?;
        let Some(mut state) = self.load_state(id).await? else {
            return Ok(());
        };
        if state.is_held_by_other(Some(lock_id)) {
            warn!(session_id = id, %lock_id, "Release ignored, lock held by another request");
            return Ok(());
        }

        state.lock = None;
        self.save_state(id, &state).await?;
        self.backend
            .expire(&self.data_key(id), state.timeout())
            .await?;
        Ok(())
    }

    async fn remove_item(
        &self,
        _ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
        _item: &SessionStateData,
    ) -> SessionResult<()> {
        validate_id(id)?;
        if let Some(state) = self.load_state(id).await?
            && state.is_held_by_other(Some(lock_id))
        {
            warn!(session_id = id, %lock_id, "Remove ignored, lock held by another request");
            return Ok(());
        }

        self.backend.delete(&self.data_key(id)).await?;
        self.backend.delete(&self.state_key(id)).await
    }

    async fn reset_item_timeout(&self, _ctx: &RequestContext, id: &str) -> SessionResult<()> {
        validate_id(id)?;
        if let Some(state) = self.load_state(id).await? {
            self.backend
                .expire(&self.data_key(id), state.timeout())
                .await?;
            self.backend
                .expire(&self.state_key(id), state.timeout())
                .await?;
        }
        Ok(())
    }

    async fn set_and_release_item_exclusive(
        &self,
        _ctx: &RequestContext,
        id: &str,
        item: &SessionStateData,
        lock_id: Option<&LockId>,
        new_item: bool,
    ) -> SessionResult<()> {
        validate_id(id)?;
        if !new_item
            && let Some(state) = self.load_state(id).await?
            && state.is_held_by_other(lock_id)
        {
            warn!(session_id = id, "Write ignored, lock held by another request");
            return Ok(());
        }

        let state = ItemState::new(item.timeout, SessionStateActions::None);
        self.write_item(id, &item.items, &state).await?;
        debug!(session_id = id, attributes = item.items.len(), "Session item stored");
        Ok(())
    }

    fn set_item_expire_callback(&self, _callback: ExpireCallback) -> SessionResult<bool> {
        // Key expiry in the backing store raises no notification.
        Ok(false)
    }

    async fn initialize_request(&self, ctx: &RequestContext) -> SessionResult<()> {
        trace!(request_id = %ctx.request_id, "Session request started");
        Ok(())
    }

    async fn end_request(&self, ctx: &RequestContext) -> SessionResult<()> {
        trace!(request_id = %ctx.request_id, "Session request ended");
        Ok(())
    }

    fn serialize_session_state(&self, items: &AttributeBag) -> SessionResult<Option<Vec<u8>>> {
        self.codec.serialize(items).map(Some)
    }

    fn deserialize_session_state(&self, bytes: &[u8]) -> SessionResult<Option<AttributeBag>> {
        self.codec.deserialize(bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::registry::TypeRegistry;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: i32,
    }

    const TIMEOUT: Duration = Duration::from_secs(20 * 60);

    fn store() -> KeyValueSessionStore<MemoryBackend> {
        let mut registry = TypeRegistry::default();
        registry.register::<Person>();
        KeyValueSessionStore::new(MemoryBackend::new(), SessionStateCodec::new(registry))
            .with_key_prefix("Tests_")
    }

    fn ctx() -> RequestContext {
        RequestContext::new("req-1").with_path("/foo.html")
    }

    #[tokio::test]
    async fn test_uninitialized_item() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc1", TIMEOUT)
            .await
            .unwrap();

        let lookup = store.get_item(&ctx(), "abc1").await.unwrap();
        let item = lookup.item.unwrap();
        assert!(item.items.is_empty());
        assert_eq!(item.timeout, TIMEOUT);
        assert_eq!(lookup.actions, SessionStateActions::InitializeItem);
        assert!(!lookup.locked);
        assert!(lookup.lock_id.is_none());
    }

    #[tokio::test]
    async fn test_missing_item() {
        let lookup = store().get_item(&ctx(), "nope").await.unwrap();
        assert_eq!(lookup, ItemLookup::not_found());
    }

    #[tokio::test]
    async fn test_store_object() {
        let store = store();
        let mut data = store
            .create_new_store_data(&ctx(), TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        data.items.set(
            "storedData0",
            Person {
                name: "Daisy".into(),
                age: 7,
            },
        );
        data.items.set("storedData1", 4_i32);
        data.items.set("storedData2", "hello new world".to_string());

        store
            .set_and_release_item_exclusive(&ctx(), "abc4", &data, None, true)
            .await
            .unwrap();

        let stored = store.get_item(&ctx(), "abc4").await.unwrap().item.unwrap();
        let person = stored.items.get::<Person>("storedData0").unwrap();
        assert_eq!(person.name, "Daisy");
        assert_eq!(person.age, 7);
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let store = store();
        let data = SessionStateData::new(AttributeBag::new(), TIMEOUT);
        store
            .set_and_release_item_exclusive(&ctx(), "abc", &data, None, true)
            .await
            .unwrap();

        assert_eq!(store.data_key("abc"), "Tests_abc");
        assert_eq!(
            store.backend().get("Tests_abc").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(store.backend().get("Tests_abc:state").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_exclusive_lock_cycle() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();

        let first = store.get_item_exclusive(&ctx(), "abc").await.unwrap();
        assert!(!first.locked);
        assert_eq!(first.actions, SessionStateActions::InitializeItem);
        let lock_id = first.lock_id.clone().unwrap();

        let second = store.get_item_exclusive(&ctx(), "abc").await.unwrap();
        assert!(second.locked);
        assert!(second.item.is_none());
        assert_eq!(second.lock_id.as_ref(), Some(&lock_id));

        let shared = store.get_item(&ctx(), "abc").await.unwrap();
        assert!(shared.locked);

        let mut data = first.item.unwrap();
        data.items.set("n", 1_i64);
        store
            .set_and_release_item_exclusive(&ctx(), "abc", &data, Some(&lock_id), false)
            .await
            .unwrap();

        let after = store.get_item(&ctx(), "abc").await.unwrap();
        assert!(!after.locked);
        assert_eq!(after.actions, SessionStateActions::None);
        assert_eq!(after.item.unwrap().items.get::<i64>("n"), Some(&1));
    }

    #[tokio::test]
    async fn test_release_requires_matching_lock() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        let lock_id = store
            .get_item_exclusive(&ctx(), "abc")
            .await
            .unwrap()
            .lock_id
            .unwrap();

        store
            .release_item_exclusive(&ctx(), "abc", &LockId::from("someone-else"))
            .await
            .unwrap();
        assert!(store.get_item(&ctx(), "abc").await.unwrap().locked);

        store
            .release_item_exclusive(&ctx(), "abc", &lock_id)
            .await
            .unwrap();
        assert!(!store.get_item(&ctx(), "abc").await.unwrap().locked);
    }

    #[tokio::test]
    async fn test_write_with_stale_lock_is_ignored() {
        let store = store();
        let mut data = SessionStateData::new(AttributeBag::new(), TIMEOUT);
        data.items.set("v", 1_i32);
        store
            .set_and_release_item_exclusive(&ctx(), "abc", &data, None, true)
            .await
            .unwrap();
        store.get_item_exclusive(&ctx(), "abc").await.unwrap();

        data.items.set("v", 2_i32);
        store
            .set_and_release_item_exclusive(&ctx(), "abc", &data, Some(&LockId::from("stale")), false)
            .await
            .unwrap();

        let lookup = store.get_item(&ctx(), "abc").await.unwrap();
        assert!(lookup.locked);
    }

    #[tokio::test]
    async fn test_remove_item() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        let lookup = store.get_item_exclusive(&ctx(), "abc").await.unwrap();
        let lock_id = lookup.lock_id.unwrap();
        let data = SessionStateData::new(AttributeBag::new(), TIMEOUT);

        store
            .remove_item(&ctx(), "abc", &lock_id, &data)
            .await
            .unwrap();
        assert!(store.get_item(&ctx(), "abc").await.unwrap().item.is_none());
        assert!(store.backend().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_expire_and_reset_timeout() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        store.reset_item_timeout(&ctx(), "abc").await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.get_item(&ctx(), "abc").await.unwrap().item.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get_item(&ctx(), "abc").await.unwrap().item.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_second_timeouts_read_back_exactly() {
        let store = store();
        for (id, timeout) in [
            ("short", Duration::from_millis(500)),
            ("fraction", Duration::from_millis(1500)),
        ] {
            let data = SessionStateData::new(AttributeBag::new(), timeout);
            store
                .set_and_release_item_exclusive(&ctx(), id, &data, None, true)
                .await
                .unwrap();

            let item = store.get_item(&ctx(), id).await.unwrap().item.unwrap();
            assert_eq!(item.timeout, timeout);
        }

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(store.get_item(&ctx(), "short").await.unwrap().item.is_none());
        assert!(store.get_item(&ctx(), "fraction").await.unwrap().item.is_some());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_is_accepted() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "forever", Duration::MAX)
            .await
            .unwrap();
        store.reset_item_timeout(&ctx(), "forever").await.unwrap();

        let lookup = store.get_item_exclusive(&ctx(), "forever").await.unwrap();
        assert!(lookup.item.is_some());
        store
            .release_item_exclusive(&ctx(), "forever", &lookup.lock_id.unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let err = store().get_item(&ctx(), "").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSessionId(_)));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_deserialization_error() {
        let store = store();
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        store
            .backend()
            .set("Tests_abc", b"\xff not json".to_vec(), TIMEOUT)
            .await
            .unwrap();

        let err = store.get_item(&ctx(), "abc").await.unwrap_err();
        assert!(err.is_deserialization());
    }

    #[tokio::test]
    async fn test_expire_callback_unsupported() {
        let callback: ExpireCallback = Arc::new(|_, _| {});
        assert!(!store().set_item_expire_callback(callback).unwrap());
    }

    #[tokio::test]
    async fn test_request_hooks_and_serializer_hooks() {
        let store = store();
        store.initialize_request(&ctx()).await.unwrap();
        store.end_request(&ctx()).await.unwrap();

        let mut bag = AttributeBag::new();
        bag.set("k", 'x');
        let bytes = store.serialize_session_state(&bag).unwrap().unwrap();
        let back = store.deserialize_session_state(&bytes).unwrap().unwrap();
        assert_eq!(back, bag);
    }
}
