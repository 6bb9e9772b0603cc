//! Error types for session state operations.

use thiserror::Error;

/// Result type for session state operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session state errors.
///
/// Errors are `Clone` so the fail-soft adapter can keep the most recent
/// failure for inspection while still handing the original back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session value could not be converted to its wire form.
    #[error("Serialization error{}: {message}", for_key(.key))]
    Serialization {
        /// Attribute key being encoded, when known.
        key: Option<String>,
        /// Underlying cause.
        message: String,
    },

    /// A payload was malformed, named an unregistered type, or a value did
    /// not match its declared type.
    #[error("Deserialization error{}: {message}", for_key(.key))]
    Deserialization {
        /// Attribute key being decoded, when known.
        key: Option<String>,
        /// Underlying cause.
        message: String,
    },

    /// Backing store command failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backing store did not answer within the configured timeout.
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid session ID
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),
}

fn for_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" for key '{}'", key),
        None => String::new(),
    }
}

impl SessionError {
    /// Create a deserialization error tied to an attribute key.
    pub fn deserialization(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Deserialization {
            key: Some(key.into()),
            message: message.to_string(),
        }
    }

    /// Create a payload-level deserialization error.
    pub fn malformed_payload(message: impl ToString) -> Self {
        Self::Deserialization {
            key: None,
            message: message.to_string(),
        }
    }

    /// Create a serialization error tied to an attribute key.
    pub fn serialization(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Serialization {
            key: Some(key.into()),
            message: message.to_string(),
        }
    }

    /// Attribute key the error refers to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Serialization { key, .. } | Self::Deserialization { key, .. } => key.as_deref(),
            _ => None,
        }
    }

    /// Whether the error came from decoding a payload.
    pub fn is_deserialization(&self) -> bool {
        matches!(self, Self::Deserialization { .. })
    }

    /// Whether the error came from the backing store.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Connection(_) | Self::Timeout(_))
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Informational only: the fail-soft adapter treats every failure alike.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

#[cfg(feature = "redis")]
impl From<armature_redis::RedisError> for SessionError {
    fn from(err: armature_redis::RedisError) -> Self {
        use armature_redis::RedisError;

        match err {
            RedisError::Timeout { .. } => Self::Timeout(err.to_string()),
            RedisError::Config(message) => Self::Config(message),
            ref other if other.is_connection_error() => Self::Connection(other.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_error_names_key() {
        let err = SessionError::deserialization("cart", "missing field `items`");
        assert_eq!(err.key(), Some("cart"));
        assert!(err.is_deserialization());
        assert_eq!(
            err.to_string(),
            "Deserialization error for key 'cart': missing field `items`"
        );
    }

    #[test]
    fn test_payload_error_without_key() {
        let err = SessionError::malformed_payload("expected value at line 1 column 1");
        assert_eq!(err.key(), None);
        assert_eq!(
            err.to_string(),
            "Deserialization error: expected value at line 1 column 1"
        );
    }

    #[test]
    fn test_classification() {
        assert!(SessionError::Timeout("GET".into()).is_retryable());
        assert!(SessionError::Store("WRONGTYPE".into()).is_store_failure());
        assert!(!SessionError::Store("WRONGTYPE".into()).is_retryable());
        assert!(!SessionError::malformed_payload("x").is_store_failure());
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_from_redis_timeout() {
        let err: SessionError = armature_redis::RedisError::Timeout {
            command: "GET",
            timeout: std::time::Duration::from_millis(10),
        }
        .into();
        assert!(matches!(err, SessionError::Timeout(_)));
    }
}
