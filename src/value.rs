//! Dynamic value model for container keys and elements
//!
//! Containers store arbitrarily shaped data, so keys and values are
//! represented by a single [`Value`] enum rather than a generic type
//! parameter. Composite mutable shapes (`List`, `Map`, `Set`) exist in the
//! model but are rejected as keys, mirroring native unhashable-type
//! semantics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically typed value storable in a container.
///
/// `Map` keeps its entries as a pair vector so that arbitrary `Value` keys
/// are representable; entry order is preserved as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Immutable sequence; hashable when every element is.
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

impl Value {
    /// Whether this value may serve as a container key / set element.
    ///
    /// Mutable composites are not hashable; a tuple is hashable only if
    /// all of its elements are.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Text(_)
            | Value::Bytes(_) => true,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            Value::List(_) | Value::Map(_) | Value::Set(_) => false,
        }
    }

    /// Type name used in unhashable-type error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:02x?}", b),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_are_hashable() {
        assert!(Value::None.is_hashable());
        assert!(Value::Int(3).is_hashable());
        assert!(Value::Text("a".into()).is_hashable());
        assert!(Value::Bytes(vec![1, 2]).is_hashable());
    }

    #[test]
    fn test_composites_are_not_hashable() {
        assert!(!Value::List(vec![]).is_hashable());
        assert!(!Value::Map(vec![]).is_hashable());
        assert!(!Value::Set(vec![]).is_hashable());
    }

    #[test]
    fn test_tuple_hashability_is_elementwise() {
        assert!(Value::Tuple(vec![Value::Int(1), Value::Text("x".into())]).is_hashable());
        assert!(!Value::Tuple(vec![Value::Int(1), Value::List(vec![])]).is_hashable());
    }

    #[test]
    fn test_display_renders_literals() {
        let v = Value::Tuple(vec![Value::Int(1), Value::Text("a".into())]);
        assert_eq!(v.to_string(), "(1, \"a\")");
        assert_eq!(Value::List(vec![Value::Int(2)]).to_string(), "[2]");
    }
}
