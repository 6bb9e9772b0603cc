//! Session state storage for Armature hosts.
//!
//! Persists per-session attribute bags to a key-value store while keeping
//! the runtime type of every attribute, and shields the host from backing
//! store outages when configured to.
//!
//! # Type-preserving payloads
//!
//! An [`AttributeBag`] holds values of any registered type. The
//! [`SessionStateCodec`] writes each attribute as a `{"Type", "Value"}` pair
//! so the value comes back as the same Rust type:
//!
//! ```json
//! {"cart":{"Type":"shop::Cart","Value":{"items":[]}},"visits":{"Type":"i32","Value":3}}
//! ```
//!
//! Types are registered once at startup in a [`TypeRegistry`]. Built-in
//! primitives, `String` and common containers are registered by default.
//!
//! # Fail-soft storage
//!
//! [`FailSoftSessionStore`] wraps any [`SessionStateStore`]. With
//! `throwOnError = false` (the default) a failed operation is recorded,
//! logged and replaced by a safe default: reads report no item and writes
//! become no-ops. Sessions therefore silently reset while the backing store
//! is down. With `throwOnError = true` the original error is returned.
//!
//! # Features
//!
//! - `redis` - Redis backing store (enabled by default)
//!
//! # Examples
//!
//! ```
//! use armature_session_state::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> SessionResult<()> {
//! let mut registry = TypeRegistry::default();
//! registry.register::<Person>();
//!
//! let inner = KeyValueSessionStore::new(MemoryBackend::new(), SessionStateCodec::new(registry));
//! let store = FailSoftSessionStore::new(inner, ErrorPolicy::Swallow);
//! let ctx = RequestContext::new("req-1");
//!
//! let mut data = SessionStateData::new(AttributeBag::new(), Duration::from_secs(1200));
//! data.items.set("p", Person { name: "Daisy".into(), age: 7 });
//! store
//!     .set_and_release_item_exclusive(&ctx, "abc", &data, None, true)
//!     .await?;
//!
//! let item = store.get_item(&ctx, "abc").await?.item.unwrap();
//! assert_eq!(item.items.get::<Person>("p").map(|p| p.age), Some(7));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod fail_soft;
mod finite;
pub mod registry;
pub mod store;
pub mod traits;
pub mod value;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use backend::{MemoryBackend, SessionBackendStore};
pub use codec::{SessionSerializer, SessionStateCodec};
pub use config::SessionStateConfig;
pub use error::{SessionError, SessionResult};
pub use fail_soft::{ErrorPolicy, FailSoftSessionStore};
pub use registry::{SessionType, TypeRegistry};
pub use store::KeyValueSessionStore;
pub use traits::{
    ExpireCallback, ItemLookup, LockId, RequestContext, SessionStateActions, SessionStateData,
    SessionStateStore,
};
pub use value::{AttributeBag, SessionItem};

#[cfg(feature = "redis")]
pub use redis_backend::{RedisSessionStateProvider, RedisSessionStateStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{MemoryBackend, SessionBackendStore};
    pub use crate::codec::{SessionSerializer, SessionStateCodec};
    pub use crate::config::SessionStateConfig;
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::fail_soft::{ErrorPolicy, FailSoftSessionStore};
    pub use crate::registry::TypeRegistry;
    pub use crate::store::KeyValueSessionStore;
    pub use crate::traits::{
        ExpireCallback, ItemLookup, LockId, RequestContext, SessionStateActions, SessionStateData,
        SessionStateStore,
    };
    pub use crate::value::AttributeBag;

    #[cfg(feature = "redis")]
    pub use crate::redis_backend::RedisSessionStateProvider;
}
