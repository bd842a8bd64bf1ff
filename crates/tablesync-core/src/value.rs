//! The dynamic value type used for row fields that don't carry a fixed Rust
//! type at replication time.
//!
//! Rows are generic over an application-defined `R: Identifiable`, but the
//! predicate/query layer and the wire request/response shapes need a
//! self-describing value so a single `ReplicationManager` can route
//! heterogeneous tables without a `Value`-per-table enum. `camelCase` on the
//! wire matches the conventions of the reference TypeScript client this
//! engine is paired with.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A self-describing field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Best-effort ordering used by predicate comparisons and sort clauses.
    ///
    /// Values of different variants are ordered by a fixed variant rank so
    /// that sorting a mixed column is deterministic rather than panicking.
    #[must_use]
    pub fn partial_cmp_value(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Int(a), Value::Float(b)) => {
                (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float(a), Value::Int(b)) => {
                a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.partial_cmp_value(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => a.variant_rank().cmp(&b.variant_rank()),
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::Array(_) => 6,
            Value::Map(_) => 7,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_null_msgpack_roundtrip() {
        let val = Value::Null;
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn value_bool_msgpack_roundtrip() {
        for b in [true, false] {
            let val = Value::Bool(b);
            let bytes = rmp_serde::to_vec(&val).expect("serialize");
            let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
            assert_eq!(val, decoded);
        }
    }

    #[test]
    fn value_int_msgpack_roundtrip() {
        for i in [0_i64, -1, 1, i64::MIN, i64::MAX] {
            let val = Value::Int(i);
            let bytes = rmp_serde::to_vec(&val).expect("serialize");
            let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
            assert_eq!(val, decoded);
        }
    }

    #[test]
    fn value_float_msgpack_roundtrip() {
        let val = Value::Float(3.14);
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn value_string_msgpack_roundtrip() {
        let val = Value::String("hello world".to_string());
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn value_bytes_msgpack_roundtrip() {
        let val = Value::Bytes(vec![0, 1, 2, 255]);
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn value_array_msgpack_roundtrip() {
        let val = Value::Array(vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(42),
            Value::String("nested".to_string()),
        ]);
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn value_map_msgpack_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::String("Alice".to_string()));
        map.insert("age".to_string(), Value::Int(30));
        map.insert("active".to_string(), Value::Bool(true));

        let val = Value::Map(map);
        let bytes = rmp_serde::to_vec(&val).expect("serialize");
        let decoded: Value = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(val, decoded);
    }

    #[test]
    fn variant_rank_orders_mixed_types() {
        assert_eq!(Value::Null.partial_cmp_value(&Value::Bool(false)), Ordering::Less);
        assert_eq!(Value::Int(5).partial_cmp_value(&Value::Float(5.0)), Ordering::Equal);
    }
}
