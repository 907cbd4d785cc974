//! Core value and key-path types.

use crate::error::{ObserveError, Result};
use crate::object::ObjectRef;
use std::collections::HashSet;
use std::fmt;

/// A property value.
///
/// Equality is strict: primitives compare by value, objects by identity.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(ObjectRef),
}

impl Value {
    /// True for `Undefined` and `Null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The object behind this value, if any.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a value from JSON. Every JSON object becomes a fresh [`ObjectRef`];
    /// arrays become objects with index keys and a `length` slot.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                let obj = ObjectRef::new();
                let len = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    obj.insert(i.to_string(), Value::from_json(item));
                }
                obj.insert("length", Value::Number(len as f64));
                Value::Object(obj)
            }
            serde_json::Value::Object(map) => {
                let obj = ObjectRef::new();
                for (key, item) in map {
                    obj.insert(key, Value::from_json(item));
                }
                Value::Object(obj)
            }
        }
    }

    /// Snapshot this value as JSON. `Undefined` becomes `null`, and an object
    /// reached twice on the current descent is cut off as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut visiting = HashSet::new();
        self.to_json_inner(&mut visiting)
    }

    fn to_json_inner(&self, visiting: &mut HashSet<crate::ObjectId>) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Object(obj) => {
                if !visiting.insert(obj.id()) {
                    return serde_json::Value::Null;
                }
                let mut map = serde_json::Map::new();
                for (key, value) in obj.own_entries() {
                    map.insert(key, value.to_json_inner(visiting));
                }
                visiting.remove(&obj.id());
                serde_json::Value::Object(map)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(obj) => write!(f, "{:?}", obj),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<&ObjectRef> for Value {
    fn from(obj: &ObjectRef) -> Self {
        Value::Object(obj.clone())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

// --- Key Paths ---

/// True when `path` has more than one segment.
pub fn is_chained(path: &str) -> bool {
    path.contains('.')
}

/// True when `path` is rooted at the global lookup namespace: the first
/// segment starts with an ASCII capital letter or `$` and a dot follows.
pub fn is_global_path(path: &str) -> bool {
    if !is_chained(path) {
        return false;
    }
    let mut chars = path.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '$' => true,
        Some(c) if c.is_ascii_digit() => matches!(chars.next(), Some(n) if n.is_ascii_uppercase() || n == '$'),
        _ => false,
    }
}

/// Split a path into segments, rejecting empty ones.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(ObserveError::InvalidPath(path.to_string()));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ObserveError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
