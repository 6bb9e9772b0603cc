//! Session state store contract consumed by the host.

use crate::error::SessionResult;
use crate::value::AttributeBag;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Per-request information handed to every store operation by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Host-assigned request identifier, used for log correlation.
    pub request_id: String,
    /// Request path, when known.
    pub path: Option<String>,
}

impl RequestContext {
    /// Create a context for `request_id`.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            path: None,
        }
    }

    /// Set the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Opaque token identifying an exclusive lock on a session item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(String);

impl LockId {
    /// Generate a fresh lock id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The token as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LockId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Actions the host must take for an item it just read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStateActions {
    /// Nothing pending.
    #[default]
    None,
    /// The item was created uninitialized and the host should initialize it.
    InitializeItem,
}

/// Session attributes plus the item timeout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStateData {
    /// Session attributes.
    pub items: AttributeBag,
    /// Idle time after which the item expires.
    pub timeout: Duration,
}

impl SessionStateData {
    /// Create session data.
    pub fn new(items: AttributeBag, timeout: Duration) -> Self {
        Self { items, timeout }
    }
}

/// Result of reading a session item.
///
/// The `Default` value is "no item": not locked, zero lock age, no lock id,
/// no pending action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemLookup {
    /// The item, when found and not locked by someone else.
    pub item: Option<SessionStateData>,
    /// Whether another request holds the lock.
    pub locked: bool,
    /// How long the current lock has been held.
    pub lock_age: Duration,
    /// Lock id held on the item, if any.
    pub lock_id: Option<LockId>,
    /// Pending host action.
    pub actions: SessionStateActions,
}

impl ItemLookup {
    /// Lookup result for an item that does not exist.
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Lookup result for an item held by another request.
    pub fn locked(lock_id: LockId, lock_age: Duration) -> Self {
        Self {
            item: None,
            locked: true,
            lock_age,
            lock_id: Some(lock_id),
            actions: SessionStateActions::None,
        }
    }
}

/// Callback invoked when a session item expires.
pub type ExpireCallback = Arc<dyn Fn(&str, Option<&SessionStateData>) + Send + Sync>;

/// Session state store driven by the host's session machinery.
///
/// Every operation is keyed by a session id plus the host-supplied request
/// context. Operations that produce an item return `Option` so "no item" can
/// be expressed without an error.
///
/// # Examples
///
/// ```ignore
/// use armature_session_state::prelude::*;
/// use std::time::Duration;
///
/// async fn load_or_create(store: &dyn SessionStateStore, ctx: &RequestContext, id: &str)
///     -> SessionResult<Option<SessionStateData>>
/// {
///     let lookup = store.get_item_exclusive(ctx, id).await?;
///     if lookup.item.is_some() || lookup.locked {
///         return Ok(lookup.item);
///     }
///     store.create_new_store_data(ctx, Duration::from_secs(20 * 60)).await
/// }
/// ```
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// Create fresh, empty session data for a new session.
    async fn create_new_store_data(
        &self,
        ctx: &RequestContext,
        timeout: Duration,
    ) -> SessionResult<Option<SessionStateData>>;

    /// Persist an empty item flagged for initialization.
    async fn create_uninitialized_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        timeout: Duration,
    ) -> SessionResult<()>;

    /// Read an item without locking it.
    async fn get_item(&self, ctx: &RequestContext, id: &str) -> SessionResult<ItemLookup>;

    /// Read an item and take the exclusive lock on it.
    async fn get_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> SessionResult<ItemLookup>;

    /// Release a lock taken by [`get_item_exclusive`](Self::get_item_exclusive).
    async fn release_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
    ) -> SessionResult<()>;

    /// Delete an item.
    async fn remove_item(
        &self,
        ctx: &RequestContext,
        id: &str,
        lock_id: &LockId,
        item: &SessionStateData,
    ) -> SessionResult<()>;

    /// Restart the expiry clock of an item.
    async fn reset_item_timeout(&self, ctx: &RequestContext, id: &str) -> SessionResult<()>;

    /// Write an item and release its lock.
    async fn set_and_release_item_exclusive(
        &self,
        ctx: &RequestContext,
        id: &str,
        item: &SessionStateData,
        lock_id: Option<&LockId>,
        new_item: bool,
    ) -> SessionResult<()>;

    /// Register an expiry callback. Returns whether the store supports it.
    fn set_item_expire_callback(&self, callback: ExpireCallback) -> SessionResult<bool>;

    /// Called at the start of every request.
    async fn initialize_request(&self, ctx: &RequestContext) -> SessionResult<()>;

    /// Called at the end of every request.
    async fn end_request(&self, ctx: &RequestContext) -> SessionResult<()>;

    /// Encode attributes into the stored payload.
    fn serialize_session_state(&self, items: &AttributeBag) -> SessionResult<Option<Vec<u8>>>;

    /// Decode a stored payload into attributes.
    fn deserialize_session_state(&self, bytes: &[u8]) -> SessionResult<Option<AttributeBag>>;
}
