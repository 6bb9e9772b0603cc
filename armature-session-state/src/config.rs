//! Session state configuration.

use crate::error::{SessionError, SessionResult};
use crate::fail_soft::ErrorPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default backing store host.
pub const DEFAULT_HOST: &str = "localhost";

/// Session state store configuration.
///
/// Field names on the wire match the named options hosts pass in, e.g.
/// `throwOnError` or `connectionTimeoutInMilliseconds`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStateConfig {
    /// Propagate store failures instead of swallowing them.
    pub throw_on_error: bool,
    /// Prefix for every key written, so applications can share a store.
    pub application_name: Option<String>,
    /// Backing store host.
    pub host: Option<String>,
    /// Backing store port.
    pub port: Option<u16>,
    /// Logical database within the backing store.
    pub database_id: Option<u8>,
    /// Time allowed to establish a connection.
    #[serde(rename = "connectionTimeoutInMilliseconds", with = "optional_millis")]
    pub connection_timeout: Option<Duration>,
    /// Time allowed for a single store operation.
    #[serde(rename = "operationTimeoutInMilliseconds", with = "optional_millis")]
    pub operation_timeout: Option<Duration>,
}

impl SessionStateConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from named options.
    ///
    /// Recognized names: `throwOnError`, `applicationName`, `host`, `port`,
    /// `databaseId`, `connectionTimeoutInMilliseconds` and
    /// `operationTimeoutInMilliseconds`. Other names are ignored, as are
    /// empty values. An unparsable `throwOnError` means `false`; unparsable
    /// numbers are configuration errors.
    ///
    /// # Examples
    ///
    /// ```
    /// use armature_session_state::SessionStateConfig;
    ///
    /// let config = SessionStateConfig::from_settings([
    ///     ("applicationName", "shop"),
    ///     ("host", "cache.internal"),
    ///     ("port", "6380"),
    ///     ("connectionTimeoutInMilliseconds", "1500"),
    /// ])
    /// .unwrap();
    ///
    /// assert_eq!(config.key_prefix(), "shop_");
    /// assert_eq!(
    ///     config.connection_string().as_deref(),
    ///     Some("cache.internal:6380,connectTimeout=1500")
    /// );
    /// ```
    pub fn from_settings<I, K, V>(settings: I) -> SessionResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (name, value) in settings {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            config.apply(name.as_ref(), value)?;
        }
        Ok(config)
    }

    /// Build a configuration from `SESSION_STATE_*` environment variables.
    ///
    /// `SESSION_STATE_THROW_ON_ERROR`, `SESSION_STATE_APPLICATION_NAME`,
    /// `SESSION_STATE_HOST`, `SESSION_STATE_PORT`, `SESSION_STATE_DATABASE_ID`,
    /// `SESSION_STATE_CONNECTION_TIMEOUT_MS` and
    /// `SESSION_STATE_OPERATION_TIMEOUT_MS` map onto the named options.
    pub fn from_env() -> SessionResult<Self> {
        const VARS: [(&str, &str); 7] = [
            ("SESSION_STATE_THROW_ON_ERROR", "throwOnError"),
            ("SESSION_STATE_APPLICATION_NAME", "applicationName"),
            ("SESSION_STATE_HOST", "host"),
            ("SESSION_STATE_PORT", "port"),
            ("SESSION_STATE_DATABASE_ID", "databaseId"),
            (
                "SESSION_STATE_CONNECTION_TIMEOUT_MS",
                "connectionTimeoutInMilliseconds",
            ),
            (
                "SESSION_STATE_OPERATION_TIMEOUT_MS",
                "operationTimeoutInMilliseconds",
            ),
        ];

        Self::from_settings(
            VARS.iter()
                .filter_map(|(var, name)| std::env::var(var).ok().map(|value| (*name, value))),
        )
    }

    fn apply(&mut self, name: &str, value: &str) -> SessionResult<()> {
        match name {
            "throwOnError" => {
                self.throw_on_error = value.eq_ignore_ascii_case("true");
            }
            "applicationName" => self.application_name = Some(value.to_string()),
            "host" => self.host = Some(value.to_string()),
            "port" => self.port = Some(parse_number(name, value)?),
            "databaseId" => self.database_id = Some(parse_number(name, value)?),
            "connectionTimeoutInMilliseconds" => {
                self.connection_timeout = Some(Duration::from_millis(parse_number(name, value)?));
            }
            "operationTimeoutInMilliseconds" => {
                self.operation_timeout = Some(Duration::from_millis(parse_number(name, value)?));
            }
            _ => {}
        }
        Ok(())
    }

    /// Set the error policy.
    pub fn with_throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.throw_on_error = throw_on_error;
        self
    }

    /// Set the application name used as key prefix.
    pub fn with_application_name(mut self, name: &str) -> Self {
        self.application_name = Some(name.to_string());
        self
    }

    /// Set the backing store address.
    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = Some(host.to_string());
        self.port = Some(port);
        self
    }

    /// Set the logical database.
    pub fn with_database_id(mut self, database_id: u8) -> Self {
        self.database_id = Some(database_id);
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Set the operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Error policy selected by `throwOnError`.
    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_throw_on_error(self.throw_on_error)
    }

    /// Prefix applied to every stored key: `"{applicationName}_"`, or empty.
    pub fn key_prefix(&self) -> String {
        match self.application_name.as_deref() {
            Some(name) if !name.is_empty() => format!("{}_", name),
            _ => String::new(),
        }
    }

    /// Stored key for session `id`.
    pub fn session_key(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix(), id)
    }

    /// Backing store address as `host:port[,connectTimeout=<ms>]`.
    ///
    /// `None` unless both host and port are set.
    pub fn connection_string(&self) -> Option<String> {
        let (host, port) = (self.host.as_deref()?, self.port?);
        let mut address = format!("{}:{}", host, port);
        if let Some(timeout) = self.connection_timeout {
            address.push_str(&format!(",connectTimeout={}", timeout.as_millis()));
        }
        Some(address)
    }

    /// Redis client configuration for these settings.
    ///
    /// Unset host and port fall back to `localhost:6379`; unset timeouts
    /// keep the client defaults.
    #[cfg(feature = "redis")]
    pub fn redis_config(&self) -> armature_redis::RedisConfig {
        let mut builder = armature_redis::RedisConfig::builder().host_port(
            self.host.as_deref().unwrap_or(DEFAULT_HOST),
            self.port.unwrap_or(armature_redis::DEFAULT_PORT),
        );
        if let Some(db) = self.database_id {
            builder = builder.database(db);
        }
        if let Some(timeout) = self.connection_timeout {
            builder = builder.connection_timeout(timeout);
        }
        if let Some(timeout) = self.operation_timeout {
            builder = builder.command_timeout(timeout);
        }
        builder.build()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> SessionResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| SessionError::Config(format!("invalid {} '{}': {}", name, value, e)))
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
