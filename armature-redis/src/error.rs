//! Redis error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for Redis operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis errors.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error.
    #[error("Pool error: {0}")]
    Pool(String),

    /// Command error.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command did not complete within the configured timeout.
    #[error("Redis {command} timed out after {timeout:?}")]
    Timeout {
        /// Command name.
        command: &'static str,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Pool(_) | Self::Timeout { .. } => true,
            Self::Redis(err) => err.is_io_error() || err.is_timeout() || err.is_connection_dropped(),
            _ => false,
        }
    }

    /// Check if this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Pool(_) => true,
            Self::Redis(err) => err.is_connection_refusal() || err.is_connection_dropped(),
            _ => false,
        }
    }
}

impl<E> From<bb8::RunError<E>> for RedisError
where
    E: std::error::Error + 'static,
{
    fn from(err: bb8::RunError<E>) -> Self {
        match err {
            bb8::RunError::TimedOut => Self::Pool("timed out waiting for a connection".to_string()),
            bb8::RunError::User(err) => Self::Connection(err.to_string()),
        }
    }
}
