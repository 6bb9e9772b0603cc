// Armature Session Provider - session state persistence for Armature hosts
//
// This library bundles the type-preserving session codec, the fail-soft
// store adapter and the Redis backing store behind one dependency.

// Re-export session state functionality
pub use armature_session_state::*;

// Re-export the Redis client
#[cfg(feature = "redis")]
pub use armature_redis;

// Prelude for common imports
pub mod prelude {
    pub use armature_session_state::prelude::*;

    #[cfg(feature = "redis")]
    pub use armature_redis::RedisConfig;
}
