// packages/pipeline/src/model/params.rs
//! Call argument values
//!
//! Arguments arrive as ordered key/value maps whose values may be scalars,
//! nested maps, lists or opaque references to live objects.

use crate::utils::errors::{LoggerError, Result};
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// A single argument value
#[derive(Debug, Clone)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
    Map(ParamMap),
    Object(ObjectRef),
}

impl ParamValue {
    /// Text used when the value is stored as a single flat cell.
    /// Containers have no scalar text and return `None`.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            ParamValue::Null => Some(String::new()),
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Str(s) => Some(s.clone()),
            ParamValue::Object(obj) => Some(obj.render()),
            ParamValue::List(_) | ParamValue::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&ParamMap> {
        match self {
            ParamValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ParamValue::Null => serializer.serialize_unit(),
            ParamValue::Bool(b) => serializer.serialize_bool(*b),
            ParamValue::Int(i) => serializer.serialize_i64(*i),
            ParamValue::Float(f) => serializer.serialize_f64(*f),
            ParamValue::Str(s) => serializer.serialize_str(s),
            ParamValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ParamValue::Map(map) => map.serialize(serializer),
            ParamValue::Object(obj) => obj.serialize(serializer),
        }
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ParamValue::Null,
            serde_json::Value::Bool(b) => ParamValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ParamValue::Int(i),
                None => ParamValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => ParamValue::Str(s),
            serde_json::Value::Array(items) => {
                ParamValue::List(items.into_iter().map(ParamValue::from).collect())
            }
            serde_json::Value::Object(fields) => ParamValue::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, ParamValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<ParamMap> for ParamValue {
    fn from(value: ParamMap) -> Self {
        ParamValue::Map(value)
    }
}

impl From<ObjectRef> for ParamValue {
    fn from(value: ObjectRef) -> Self {
        ParamValue::Object(value)
    }
}

/// Insertion-ordered string-keyed map
///
/// Re-inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    entries: Vec<(String, ParamValue)>,
}

impl ParamMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, keeping its position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ParamMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for ParamMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// State capture for an object reference held by an event
pub trait ObjectSnapshot: fmt::Debug + Send + Sync {
    /// Class (type) name of the referenced object
    fn class_name(&self) -> &str;

    /// Structured view of the object's state
    fn snapshot(&self) -> Result<serde_json::Value>;
}

/// Shared, opaque reference to the object a call was made on or with
#[derive(Debug, Clone)]
pub struct ObjectRef(Arc<dyn ObjectSnapshot>);

impl ObjectRef {
    pub fn new(object: impl ObjectSnapshot + 'static) -> Self {
        Self(Arc::new(object))
    }

    /// Wrap any serializable value under the given class name
    pub fn from_serialize<T>(class: impl Into<String>, value: T) -> Self
    where
        T: Serialize + fmt::Debug + Send + Sync + 'static,
    {
        Self::new(SerializedObject {
            class: class.into(),
            value,
        })
    }

    pub fn class_name(&self) -> &str {
        self.0.class_name()
    }

    pub fn snapshot(&self) -> Result<serde_json::Value> {
        self.0.snapshot()
    }

    /// Textual form `Class:{state}`.
    ///
    /// Never fails: an object whose state cannot be captured renders as a
    /// placeholder naming the class and the reason.
    pub fn render(&self) -> String {
        match self.snapshot() {
            Ok(state) => format!("{}:{}", self.class_name(), state),
            Err(e) => format!("{}:<unserializable: {}>", self.class_name(), e),
        }
    }
}

impl Serialize for ObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Object", 2)?;
        state.serialize_field("class", self.class_name())?;
        match self.snapshot() {
            Ok(snapshot) => state.serialize_field("state", &snapshot)?,
            Err(e) => state.serialize_field("state", &format!("<unserializable: {}>", e))?,
        }
        state.end()
    }
}

#[derive(Debug)]
struct SerializedObject<T> {
    class: String,
    value: T,
}

impl<T> ObjectSnapshot for SerializedObject<T>
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn class_name(&self) -> &str {
        &self.class
    }

    fn snapshot(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.value)
            .map_err(|e| LoggerError::Serialization(format!("{}: {}", self.class, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Unserializable;

    impl ObjectSnapshot for Unserializable {
        fn class_name(&self) -> &str {
            "Socket"
        }

        fn snapshot(&self) -> Result<serde_json::Value> {
            Err(LoggerError::Serialization("resource handle".to_string()))
        }
    }

    #[test]
    fn test_insert_keeps_order_and_replaces_in_place() {
        let mut map = ParamMap::new();
        map.insert("b", 1i64);
        map.insert("a", 2i64);
        map.insert("b", 3i64);

        let keys: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(matches!(map.get("b"), Some(ParamValue::Int(3))));
    }

    #[test]
    fn test_serialize_preserves_order() {
        let map = ParamMap::new().with("z", 1i64).with("a", "x");
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"z":1,"a":"x"}"#);
    }

    #[test]
    fn test_from_json_value() {
        let value = ParamValue::from(json!({"a": {"b": [1, true, null]}}));
        let inner = value.as_map().unwrap().get("a").unwrap().as_map().unwrap();
        assert!(matches!(inner.get("b"), Some(ParamValue::List(items)) if items.len() == 3));
    }

    #[test]
    fn test_from_json_keeps_document_order() {
        let value: serde_json::Value = serde_json::from_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let map = ParamValue::from(value);

        let keys: Vec<_> = map.as_map().unwrap().iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_object_render() {
        let obj = ObjectRef::from_serialize("User", json!({"id": 7}));
        assert_eq!(obj.render(), r#"User:{"id":7}"#);
    }

    #[test]
    fn test_object_render_fails_closed() {
        let obj = ObjectRef::new(Unserializable);
        let text = obj.render();
        assert!(text.starts_with("Socket:<unserializable"));

        let json = serde_json::to_value(&obj).unwrap();
        assert_eq!(json["class"], "Socket");
        assert!(json["state"].as_str().unwrap().contains("resource handle"));
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(ParamValue::Null.scalar_text().unwrap(), "");
        assert_eq!(ParamValue::Bool(false).scalar_text().unwrap(), "false");
        assert_eq!(ParamValue::Float(1.5).scalar_text().unwrap(), "1.5");
        assert!(ParamValue::Map(ParamMap::new()).scalar_text().is_none());
    }
}
