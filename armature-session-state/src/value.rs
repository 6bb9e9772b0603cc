//! Session attribute values and the attribute bag.

use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;

/// A value that can be stored in an [`AttributeBag`].
///
/// Implemented for every `Serialize + Clone + PartialEq + Debug + Send + Sync`
/// type; application types only need the usual derives. Reading a value back
/// from a payload additionally requires the type to be registered with a
/// [`TypeRegistry`](crate::registry::TypeRegistry).
pub trait SessionItem: Any + Send + Sync + fmt::Debug {
    /// Runtime type name of the concrete value.
    fn type_name(&self) -> &'static str;

    /// Convert the value into a JSON tree. Fails on NaN or infinite floats,
    /// which JSON cannot represent.
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;

    /// Clone into a new box.
    fn clone_item(&self) -> Box<dyn SessionItem>;

    /// Equal when `other` has the same concrete type and an equal value.
    fn eq_item(&self, other: &dyn SessionItem) -> bool;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> SessionItem for T
where
    T: Serialize + Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        crate::finite::check(self).map_err(<serde_json::Error as serde::ser::Error>::custom)?;
        serde_json::to_value(self)
    }

    fn clone_item(&self) -> Box<dyn SessionItem> {
        Box::new(self.clone())
    }

    fn eq_item(&self, other: &dyn SessionItem) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<'a> dyn SessionItem + 'a {
    /// Concrete `TypeId` of the boxed value.
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    /// Check whether the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Borrow the value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// String-keyed session attributes for one session.
///
/// A key may map to `null`, which is distinct from the key being absent.
#[derive(Default)]
pub struct AttributeBag {
    items: HashMap<String, Option<Box<dyn SessionItem>>>,
}

impl AttributeBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, replacing any previous entry.
    pub fn set<T: SessionItem>(&mut self, key: impl Into<String>, value: T) {
        self.items.insert(key.into(), Some(Box::new(value)));
    }

    /// Store an already boxed value, or `null` when `value` is `None`.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Box<dyn SessionItem>>) {
        self.items.insert(key.into(), value);
    }

    /// Store `null` under `key`.
    pub fn set_null(&mut self, key: impl Into<String>) {
        self.items.insert(key.into(), None);
    }

    /// Borrow the value under `key` as a `T`.
    ///
    /// Returns `None` when the key is absent, null, or holds another type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.get_item(key)?.downcast_ref::<T>()
    }

    /// Mutably borrow the value under `key` as a `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.items
            .get_mut(key)?
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    /// Borrow the untyped value under `key`; `None` when absent or null.
    pub fn get_item(&self, key: &str) -> Option<&dyn SessionItem> {
        self.items.get(key)?.as_deref()
    }

    /// Whether `key` is present and holds `null`.
    pub fn is_null(&self, key: &str) -> bool {
        matches!(self.items.get(key), Some(None))
    }

    /// Whether `key` is present (including as `null`).
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Runtime type name of the value under `key`.
    pub fn type_name_of(&self, key: &str) -> Option<&'static str> {
        self.get_item(key).map(|item| item.type_name())
    }

    /// Remove `key`, returning its entry if it was present.
    pub fn remove(&mut self, key: &str) -> Option<Option<Box<dyn SessionItem>>> {
        self.items.remove(key)
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Iterate over entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&dyn SessionItem>)> {
        self.items
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    /// Number of entries, null entries included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl Clone for AttributeBag {
    fn clone(&self) -> Self {
        let items = self
            .items
            .iter()
            .map(|(key, value)| (key.clone(), value.as_ref().map(|item| item.clone_item())))
            .collect();
        Self { items }
    }
}

impl PartialEq for AttributeBag {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self.items.iter().all(|(key, value)| {
                match (value, other.items.get(key)) {
                    (None, Some(None)) => true,
                    (Some(a), Some(Some(b))) => a.eq_item(&**b),
                    _ => false,
                }
            })
    }
}

impl fmt::Debug for AttributeBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items.iter()).finish()
    }
}

impl IntoIterator for AttributeBag {
    type Item = (String, Option<Box<dyn SessionItem>>);
    type IntoIter = hash_map::IntoIter<String, Option<Box<dyn SessionItem>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<(String, Option<Box<dyn SessionItem>>)> for AttributeBag {
    fn from_iter<I: IntoIterator<Item = (String, Option<Box<dyn SessionItem>>)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        age: i32,
    }

    #[test]
    fn test_to_json_rejects_non_finite_floats() {
        assert!(f64::NAN.to_json().is_err());
        assert!(vec![1.0_f32, f32::INFINITY].to_json().is_err());
        assert_eq!(2.5_f64.to_json().unwrap(), serde_json::json!(2.5));
    }

    #[test]
    fn test_typed_get() {
        let mut bag = AttributeBag::new();
        bag.set("n", 4_i32);
        bag.set("s", "hello".to_string());

        assert_eq!(bag.get::<i32>("n"), Some(&4));
        assert_eq!(bag.get::<i64>("n"), None);
        assert_eq!(bag.get::<String>("s").map(String::as_str), Some("hello"));
        assert_eq!(bag.type_name_of("n"), Some("i32"));
    }

    #[test]
    fn test_null_is_not_absent() {
        let mut bag = AttributeBag::new();
        bag.set_null("obj");

        assert!(bag.contains_key("obj"));
        assert!(bag.is_null("obj"));
        assert!(bag.get_item("obj").is_none());
        assert!(!bag.contains_key("missing"));
        assert!(!bag.is_null("missing"));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut bag = AttributeBag::new();
        bag.set(
            "p",
            Person {
                name: "Daisy".into(),
                age: 7,
            },
        );

        bag.get_mut::<Person>("p").unwrap().age += 1;
        assert_eq!(bag.get::<Person>("p").unwrap().age, 8);
    }

    #[test]
    fn test_equality_is_type_aware() {
        let mut a = AttributeBag::new();
        a.set("n", 4_i32);
        a.set_null("x");

        let mut b = AttributeBag::new();
        b.set_null("x");
        b.set("n", 4_i32);
        assert_eq!(a, b);

        let mut c = AttributeBag::new();
        c.set("n", 4_i64);
        c.set_null("x");
        assert_ne!(a, c);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut bag = AttributeBag::new();
        bag.set("list", vec!["a".to_string()]);

        let mut copy = bag.clone();
        copy.get_mut::<Vec<String>>("list").unwrap().push("b".into());

        assert_eq!(bag.get::<Vec<String>>("list").unwrap().len(), 1);
        assert_eq!(copy.get::<Vec<String>>("list").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut bag = AttributeBag::new();
        bag.set("a", true);
        bag.set_null("b");

        assert!(matches!(bag.remove("b"), Some(None)));
        assert!(bag.remove("b").is_none());
        bag.clear();
        assert!(bag.is_empty());
    }
}
