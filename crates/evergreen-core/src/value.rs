//! Configuration tree values
//!
//! A template is a tree of [`Value`]s: scalars (string, int, float, bool, null,
//! raw bytes), sequences and mappings. String leaves may carry expressions
//! (`{{path}}` placeholders and `$name:` directives) until the engine has
//! materialized them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::path::{ArrayPath, Subpath};

/// A configuration value that may contain unresolved expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[derive(Default)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value (may contain expressions like {{database.host}})
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
    /// Raw content a directive passed through without parsing
    #[serde(skip_deserializing)]
    Bytes(Vec<u8>),
}

impl Value {
    /// An empty mapping
    pub fn mapping() -> Self {
        Value::Mapping(IndexMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// Mappings and sequences are branches; everything else is a leaf
    pub fn is_branch(&self) -> bool {
        matches!(self, Value::Mapping(_) | Value::Sequence(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Get the node at `path`, failing with `PathNotFound` if any step is missing
    pub fn get_at(&self, path: &ArrayPath) -> Result<&Value> {
        let mut current = self;

        for subpath in path {
            current = match (subpath, current) {
                (Subpath::Field(key), Value::Mapping(map)) => map
                    .get(key.as_str())
                    .ok_or_else(|| Error::path_not_found(path.join()))?,
                (Subpath::Index(idx), Value::Sequence(seq)) => seq
                    .get(*idx)
                    .ok_or_else(|| Error::path_not_found(path.join()))?,
                _ => return Err(Error::path_not_found(path.join())),
            };
        }

        Ok(current)
    }

    /// Get a mutable reference to the node at `path`
    pub fn get_at_mut(&mut self, path: &ArrayPath) -> Result<&mut Value> {
        let mut current = self;

        for subpath in path {
            current = match (subpath, current) {
                (Subpath::Field(key), Value::Mapping(map)) => map
                    .get_mut(key.as_str())
                    .ok_or_else(|| Error::path_not_found(path.join()))?,
                (Subpath::Index(idx), Value::Sequence(seq)) => seq
                    .get_mut(*idx)
                    .ok_or_else(|| Error::path_not_found(path.join()))?,
                _ => return Err(Error::path_not_found(path.join())),
            };
        }

        Ok(current)
    }

    /// Replace the node at an existing `path`. Never creates intermediate nodes.
    pub fn set_at(&mut self, path: &ArrayPath, value: Value) -> Result<()> {
        let slot = self.get_at_mut(path)?;
        *slot = value;
        Ok(())
    }

    /// Get a value by symbolic path (e.g., "database.host" or "servers[0].name")
    pub fn get_path(&self, sympath: &str) -> Result<&Value> {
        self.get_at(&ArrayPath::parse(sympath)?)
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}
