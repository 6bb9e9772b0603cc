//! Registry of session value types that can be restored from a payload.
//!
//! Encoding records the name of each value's concrete type; decoding looks
//! that name up here to find the conversion back from a JSON tree. Only
//! registered types round-trip. A payload naming an unknown type fails to
//! decode instead of degrading to an untyped value.

use crate::value::SessionItem;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

/// A session value type that can be restored from a payload.
pub trait SessionType: SessionItem + DeserializeOwned {}

impl<T: SessionItem + DeserializeOwned> SessionType for T {}

type DecodeFn = fn(serde_json::Value) -> serde_json::Result<Box<dyn SessionItem>>;

fn decode_as<T: SessionType>(value: serde_json::Value) -> serde_json::Result<Box<dyn SessionItem>> {
    let value: T = serde_json::from_value(value)?;
    Ok(Box::new(value))
}

/// Name → decoder table for session value types.
///
/// # Examples
///
/// ```
/// use armature_session_state::TypeRegistry;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Cart {
///     items: Vec<String>,
/// }
///
/// let mut registry = TypeRegistry::default();
/// registry.register::<Cart>();
/// registry.register_as::<Vec<u32>>("ids");
///
/// assert!(registry.contains(std::any::type_name::<Cart>()));
/// assert!(registry.contains("ids"));
/// ```
#[derive(Clone)]
pub struct TypeRegistry {
    decoders: HashMap<String, DecodeFn>,
    names: HashMap<TypeId, String>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// Create a registry with the primitive, string, collection, JSON,
    /// timestamp and UUID types pre-registered.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry
            .register::<bool>()
            .register::<char>()
            .register::<i8>()
            .register::<i16>()
            .register::<i32>()
            .register::<i64>()
            .register::<isize>()
            .register::<u8>()
            .register::<u16>()
            .register::<u32>()
            .register::<u64>()
            .register::<usize>()
            .register::<f32>()
            .register::<f64>()
            .register::<String>()
            .register::<Vec<String>>()
            .register::<Vec<i64>>()
            .register::<HashMap<String, String>>()
            .register::<serde_json::Value>()
            .register::<DateTime<Utc>>()
            .register::<uuid::Uuid>();
        registry
    }

    /// Register `T` under its runtime type name.
    pub fn register<T: SessionType>(&mut self) -> &mut Self {
        self.register_as::<T>(std::any::type_name::<T>())
    }

    /// Register `T` under an explicit name.
    ///
    /// The alias is also written when encoding values of `T`, so payloads
    /// stay readable after the type is moved or renamed.
    pub fn register_as<T: SessionType>(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if let Some(previous) = self.names.insert(TypeId::of::<T>(), name.clone())
            && previous != name
        {
            self.decoders.remove(&previous);
        }
        self.decoders.insert(name, decode_as::<T>);
        self
    }

    /// Whether a type is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Name written to the payload for `item`.
    ///
    /// Unregistered types fall back to their runtime type name.
    pub fn name_of<'a>(&'a self, item: &dyn SessionItem) -> &'a str {
        match self.names.get(&item.concrete_type_id()) {
            Some(name) => name.as_str(),
            None => item.type_name(),
        }
    }

    /// Convert a JSON tree into the type registered under `name`.
    ///
    /// Returns `None` when nothing is registered under `name`.
    pub fn decode(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Option<serde_json::Result<Box<dyn SessionItem>>> {
        self.decoders.get(name).map(|decode| decode(value))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtin_types()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}
