//! Type-preserving session payload codec.
//!
//! The payload is UTF-8 JSON: an object keyed by attribute name, where every
//! entry records the concrete type name alongside the value.
//!
//! ```json
//! {
//!   "n":   { "Type": "i32", "Value": 4 },
//!   "obj": { "Type": null, "Value": null },
//!   "p":   { "Type": "app::Person", "Value": { "name": "Daisy", "age": 7 } }
//! }
//! ```
//!
//! NaN and infinite floats have no JSON form and fail to encode.
//!
//! Decoding converts each JSON value back into the registered type named by
//! its entry, so two types with identical fields still come back as
//! themselves.

use crate::error::{SessionError, SessionResult};
use crate::registry::TypeRegistry;
use crate::value::AttributeBag;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Hook used by session stores to turn attributes into stored bytes and back.
pub trait SessionSerializer: Send + Sync {
    /// Encode attributes into a payload.
    fn serialize(&self, items: &AttributeBag) -> SessionResult<Vec<u8>>;

    /// Decode a payload into attributes.
    fn deserialize(&self, bytes: &[u8]) -> SessionResult<AttributeBag>;
}

/// One attribute on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct TypedEntry {
    #[serde(rename = "Type", default)]
    type_name: Option<String>,
    #[serde(rename = "Value", default)]
    value: Option<serde_json::Value>,
}

impl TypedEntry {
    fn null() -> Self {
        Self {
            type_name: None,
            value: None,
        }
    }
}

/// JSON codec that records each value's concrete type.
#[derive(Debug, Clone)]
pub struct SessionStateCodec {
    registry: Arc<TypeRegistry>,
}

impl Default for SessionStateCodec {
    fn default() -> Self {
        Self::new(TypeRegistry::default())
    }
}

impl SessionStateCodec {
    /// Create a codec over `registry`.
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Create a codec sharing an existing registry.
    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry used to resolve type names.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encode `bag` into a UTF-8 JSON payload.
    ///
    /// Keys are written in sorted order so equal bags produce equal bytes.
    pub fn encode(&self, bag: &AttributeBag) -> SessionResult<Vec<u8>> {
        let mut entries = BTreeMap::new();
        for (key, item) in bag.iter() {
            let entry = match item {
                None => TypedEntry::null(),
                Some(item) => TypedEntry {
                    type_name: Some(self.registry.name_of(item).to_string()),
                    value: Some(
                        item.to_json()
                            .map_err(|e| SessionError::serialization(key, e))?,
                    ),
                },
            };
            entries.insert(key, entry);
        }

        serde_json::to_vec(&entries).map_err(|e| SessionError::Serialization {
            key: None,
            message: e.to_string(),
        })
    }

    /// Decode a payload produced by [`encode`](Self::encode).
    ///
    /// An entry with a null type or a null value decodes to `null`. Any other
    /// entry must name a registered type whose shape matches the value.
    pub fn decode(&self, bytes: &[u8]) -> SessionResult<AttributeBag> {
        let text = std::str::from_utf8(bytes).map_err(SessionError::malformed_payload)?;
        let entries: HashMap<String, TypedEntry> =
            serde_json::from_str(text).map_err(SessionError::malformed_payload)?;

        let mut bag = AttributeBag::new();
        for (key, entry) in entries {
            let (type_name, value) = match (entry.type_name, entry.value) {
                (Some(type_name), Some(value)) if !value.is_null() => (type_name, value),
                _ => {
                    bag.set_null(key);
                    continue;
                }
            };

            let item = match self.registry.decode(&type_name, value) {
                Some(Ok(item)) => item,
                Some(Err(e)) => {
                    return Err(SessionError::deserialization(
                        key,
                        format!("value does not match type '{}': {}", type_name, e),
                    ));
                }
                None => {
                    return Err(SessionError::deserialization(
                        key,
                        format!("type '{}' is not registered", type_name),
                    ));
                }
            };
            bag.insert(key, Some(item));
        }

        Ok(bag)
    }
}

impl SessionSerializer for SessionStateCodec {
    fn serialize(&self, items: &AttributeBag) -> SessionResult<Vec<u8>> {
        self.encode(items)
    }

    fn deserialize(&self, bytes: &[u8]) -> SessionResult<AttributeBag> {
        self.decode(bytes)
    }
}
