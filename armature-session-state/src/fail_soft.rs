//! Fail-soft wrapper around a session state store.
//!
//! With [`ErrorPolicy::Swallow`], a backing store outage turns into "no
//! session data": reads report no item, writes become no-ops. Sessions
//! silently reset while the store is unavailable. The failure is kept in
//! [`FailSoftSessionStore::last_error`] and logged, so it stays visible to
//! operators even though the request carries on.

use crate::error::{SessionError, SessionResult};
use crate::traits::{
    ExpireCallback, ItemLookup, LockId, RequestContext, SessionStateData, SessionStateStore,
};
use crate::value::AttributeBag;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// What to do with a failed store operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Record the failure and return a safe default.
    #[default]
    Swallow,
    /// Record the failure and hand it back to the caller unchanged.
    Propagate,
}

impl ErrorPolicy {
    /// Policy selected by the `throwOnError` option.
    pub fn from_throw_on_error(throw_on_error: bool) -> Self {
        if throw_on_error {
            Self::Propagate
        } else {
            Self::Swallow
        }
    }

    /// Whether failures reach the caller.
    pub fn propagates(self) -> bool {
        self == Self::Propagate
    }
}

/// Session state store applying an [`ErrorPolicy`] to every operation.
///
/// Only failures update the recorded last error; successful operations leave
/// it as is. Concurrent failures overwrite each other, the last one wins.
///
/// # Examples
///
/// ```
/// use armature_session_state::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let inner = KeyValueSessionStore::new(MemoryBackend::new(), SessionStateCodec::default());
/// let store = FailSoftSessionStore::new(inner, ErrorPolicy::Swallow);
///
/// let lookup = store.get_item(&RequestContext::new("req-1"), "").await.unwrap();
/// assert!(lookup.item.is_none());
/// assert!(store.last_error().is_some());
/// # }
/// ```
pub struct FailSoftSessionStore<S> {
    inner: S,
    policy: ErrorPolicy,
    last_error: Mutex<Option<SessionError>>,
}

impl<S: SessionStateStore> FailSoftSessionStore<S> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: S, policy: ErrorPolicy) -> Self {
        Self {
            inner,
            policy,
            last_error: Mutex::new(None),
        }
    }

    /// The active policy.
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Most recent failure, if any operation has failed.
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error.lock().clone()
    }

    /// Take the most recent failure, clearing it.
    pub fn take_last_error(&self) -> Option<SessionError> {
        self.last_error.lock().take()
    }

    fn guard<T>(
        &self,
        operation: &'static str,
        result: SessionResult<T>,
        fallback: T,
    ) -> SessionResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    operation,
                    error = %err,
                    policy = ?self.policy,
                    "Session state operation failed"
                );
                *self.last_error.lock() = Some(err.clone());
                if self.policy.propagates() {
                    Err(err)
                } else {
                    Ok(fallback)
                }
            }
        }
    }
}

#[async_trait]
impl<S: SessionStateStore> SessionStateStore for FailSoftSessionStore<S> {
    async fn create_new_store_data(
        &self,
        ctx: &RequestContext,
        timeout: Duration,
    ) -> SessionResult<Option<SessionStateData>> {
        let result = self.inner.create_new_store_data(ctx, timeout).await;
        self.guard("create_new_store_data", result, None)
    }

    async fn create_uninitialized_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        timeout: Duration,
    ) -> SessionResult<()> {
        let result = self.inner.create_uninitialized_item(ctx, id, timeout).await;
        self.guard("create_uninitialized_item", result, ())
    }

    async fn get_item(&self, ctx: &RequestContext, id: &str) -> SessionResult<ItemLookup> {
        let result = self.inner.get_item(ctx, id).await;
        self.guard("get_item", result, ItemLookup::default())
    }

    async fn get_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> SessionResult<ItemLookup> {
        let result = self.inner.get_item_exclusive(ctx, id).await;
        self.guard("get_item_exclusive", result, ItemLookup::default())
    }

    async fn release_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
    ) -> SessionResult<()> {
        let result = self.inner.release_item_exclusive(ctx, id, lock_id).await;
        self.guard("release_item_exclusive", result, ())
    }

    async fn remove_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
        item: &SessionStateData,
    ) -> SessionResult<()> {
        let result = self.inner.remove_item(ctx, id, lock_id, item).await;
        self.guard("remove_item", result, ())
    }

    async fn reset_item_timeout(&self, ctx: &RequestContext, id: &str) -> SessionResult<()> {
        let result = self.inner.reset_item_timeout(ctx, id).await;
        self.guard("reset_item_timeout", result, ())
    }

    async fn set_and_release_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
        item: &SessionStateData,
        lock_id: Option<&LockId>,
        new_item: bool,
    ) -> SessionResult<()> {
        let result = self
            .inner
            .set_and_release_item_exclusive(ctx, id, item, lock_id, new_item)
            .await;
        self.guard("set_and_release_item_exclusive", result, ())
    }

    fn set_item_expire_callback(&self, callback: ExpireCallback) -> SessionResult<bool> {
        let result = self.inner.set_item_expire_callback(callback);
        self.guard("set_item_expire_callback", result, false)
    }

    async fn initialize_request(&self, ctx: &RequestContext) -> SessionResult<()> {
        let result = self.inner.initialize_request(ctx).await;
        self.guard("initialize_request", result, ())
    }

    async fn end_request(&self, ctx: &RequestContext) -> SessionResult<()> {
        let result = self.inner.end_request(ctx).await;
        self.guard("end_request", result, ())
    }

    fn serialize_session_state(&self, items: &AttributeBag) -> SessionResult<Option<Vec<u8>>> {
        let result = self.inner.serialize_session_state(items);
        self.guard("serialize_session_state", result, None)
    }

    fn deserialize_session_state(&self, bytes: &[u8]) -> SessionResult<Option<AttributeBag>> {
        let result = self.inner.deserialize_session_state(bytes);
        self.guard("deserialize_session_state", result, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SessionBackendStore};
    use crate::codec::SessionStateCodec;
    use crate::store::KeyValueSessionStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that fails every command while `down` is set.
    #[derive(Clone, Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        down: Arc<AtomicBool>,
    }

    impl FlakyBackend {
        fn set_down(&self, down: bool) {
            self.down.store(down, Ordering::SeqCst);
        }

        fn check(&self) -> SessionResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(SessionError::Connection("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SessionBackendStore for FlakyBackend {
        async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> SessionResult<()> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> SessionResult<()> {
            self.check()?;
            self.inner.delete(key).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> SessionResult<bool> {
            self.check()?;
            self.inner.expire(key, ttl).await
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(60);

    type FlakyStore = FailSoftSessionStore<KeyValueSessionStore<FlakyBackend>>;

    fn fail_soft_store(policy: ErrorPolicy) -> (FlakyStore, FlakyBackend) {
        let backend = FlakyBackend::default();
        let inner = KeyValueSessionStore::new(backend.clone(), SessionStateCodec::default());
        (FailSoftSessionStore::new(inner, policy), backend)
    }

    fn ctx() -> RequestContext {
        RequestContext::new("req-1")
    }

    #[test]
    fn test_policy_from_throw_on_error() {
        assert_eq!(ErrorPolicy::from_throw_on_error(true), ErrorPolicy::Propagate);
        assert_eq!(ErrorPolicy::from_throw_on_error(false), ErrorPolicy::Swallow);
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Swallow);
    }

    #[tokio::test]
    async fn test_swallow_returns_safe_lookup() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Swallow);
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        backend.set_down(true);

        let lookup = store.get_item(&ctx(), "abc").await.unwrap();
        assert!(lookup.item.is_none());
        assert!(!lookup.locked);
        assert_eq!(lookup.lock_age, Duration::ZERO);
        assert!(lookup.lock_id.is_none());
        assert_eq!(lookup, ItemLookup::default());

        assert_eq!(
            store.last_error(),
            Some(SessionError::Connection("connection refused".into()))
        );
    }

    #[tokio::test]
    async fn test_swallow_void_operations() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Swallow);
        backend.set_down(true);

        let data = SessionStateData::new(AttributeBag::new(), TIMEOUT);
        store
            .set_and_release_item_exclusive(&ctx(), "abc", &data, None, true)
            .await
            .unwrap();
        store.reset_item_timeout(&ctx(), "abc").await.unwrap();
        store
            .remove_item(&ctx(), "abc", &LockId::from("x"), &data)
            .await
            .unwrap();
        assert!(store.get_item_exclusive(&ctx(), "abc").await.unwrap().item.is_none());
        assert!(store.last_error().unwrap().is_store_failure());
    }

    #[tokio::test]
    async fn test_swallow_records_each_operation_failure() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Swallow);
        backend.set_down(true);
        let refused = Some(SessionError::Connection("connection refused".into()));

        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(store.take_last_error(), refused);

        store
            .release_item_exclusive(&ctx(), "abc", &LockId::from("x"))
            .await
            .unwrap();
        assert_eq!(store.take_last_error(), refused);

        let mut bag = AttributeBag::new();
        bag.set("ratio", f64::NAN);
        assert!(store.serialize_session_state(&bag).unwrap().is_none());
        let err = store.take_last_error().unwrap();
        assert!(matches!(err, SessionError::Serialization { .. }));
        assert_eq!(err.key(), Some("ratio"));
    }

    #[tokio::test]
    async fn test_propagate_returns_original_error() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Propagate);
        backend.set_down(true);

        let err = store.get_item(&ctx(), "abc").await.unwrap_err();
        assert_eq!(err, SessionError::Connection("connection refused".into()));
        assert_eq!(store.last_error(), Some(err));
    }

    #[tokio::test]
    async fn test_success_leaves_last_error_unchanged() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Swallow);
        backend.set_down(true);
        store.get_item(&ctx(), "abc").await.unwrap();
        let recorded = store.last_error();
        assert!(recorded.is_some());

        backend.set_down(false);
        store
            .create_uninitialized_item(&ctx(), "abc", TIMEOUT)
            .await
            .unwrap();
        assert!(store.get_item(&ctx(), "abc").await.unwrap().item.is_some());
        assert_eq!(store.last_error(), recorded);

        assert_eq!(store.take_last_error(), recorded);
        assert!(store.last_error().is_none());
    }

    #[tokio::test]
    async fn test_latest_failure_wins() {
        let (store, backend) = fail_soft_store(ErrorPolicy::Swallow);
        backend.set_down(true);
        store.get_item(&ctx(), "abc").await.unwrap();

        backend.set_down(false);
        store.get_item(&ctx(), "").await.unwrap();
        assert!(matches!(
            store.last_error(),
            Some(SessionError::InvalidSessionId(_))
        ));
    }

    #[test]
    fn test_swallowed_decode_failure_returns_none() {
        let (store, _) = fail_soft_store(ErrorPolicy::Swallow);
        assert!(store.deserialize_session_state(b"not json").unwrap().is_none());
        assert!(store.last_error().unwrap().is_deserialization());

        let (store, _) = fail_soft_store(ErrorPolicy::Propagate);
        assert!(
            store
                .deserialize_session_state(b"not json")
                .unwrap_err()
                .is_deserialization()
        );
    }

    #[test]
    fn test_expire_callback_reports_unsupported() {
        let (store, _) = fail_soft_store(ErrorPolicy::Swallow);
        let callback: ExpireCallback = Arc::new(|_, _| {});
        assert!(!store.set_item_expire_callback(callback).unwrap());
        assert!(store.last_error().is_none());
    }
}
