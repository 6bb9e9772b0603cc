//! # Armature Redis
//!
//! Redis client used as the backing store for Armature session state.
//!
//! ## Features
//!
//! - **Connection Pooling**: Efficient connection management with bb8
//! - **Bounded Commands**: Every command honours the configured operation timeout
//! - **Logical Databases**: Select a database number per service
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_redis::{RedisService, RedisConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .host_port("localhost", 6379)
//!         .database(2)
//!         .connection_timeout(Duration::from_millis(2000))
//!         .command_timeout(Duration::from_millis(500))
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!
//!     redis.set_bytes_ex("key", b"value", Duration::from_secs(60)).await?;
//!     let value = redis.get_bytes("key").await?;
//!     assert_eq!(value.as_deref(), Some(&b"value"[..]));
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{DEFAULT_PORT, RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use armature_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pool::{RedisConnection, RedisPool};
    pub use crate::service::RedisService;
}
