//! Conversion between `tablesync_core::Value` and `serde_json::Value`, used
//! to view an opaque application row generically as a field map for
//! predicate evaluation and field-level conflict merges.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value as Json;

use tablesync_core::Value;

pub fn from_json(j: Json) -> Value {
    match j {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

pub fn to_json(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::Number((*byte).into())).collect()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => {
            Json::Object(map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
    }
}

/// Serializes an application row to its field map, for predicate evaluation
/// and field-level conflict merges. Returns an empty map if `data` does not
/// serialize to a JSON object.
pub fn row_fields<R: Serialize>(data: &R) -> BTreeMap<String, Value> {
    match serde_json::to_value(data) {
        Ok(Json::Object(map)) => map.into_iter().map(|(k, v)| (k, from_json(v))).collect(),
        _ => BTreeMap::new(),
    }
}

/// Serializes a value's canonical string form, used as a secondary-index key.
#[must_use]
pub fn index_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(&to_json(other)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Todo {
        title: String,
        done: bool,
    }

    #[test]
    fn row_fields_extracts_object_fields() {
        let todo = Todo { title: "write tests".into(), done: false };
        let fields = row_fields(&todo);
        assert_eq!(fields.get("title"), Some(&Value::String("write tests".into())));
        assert_eq!(fields.get("done"), Some(&Value::Bool(false)));
    }

    #[test]
    fn index_key_is_stable_for_strings_and_ints() {
        assert_eq!(index_key(&Value::String("alice".into())), "alice");
        assert_eq!(index_key(&Value::Int(42)), "42");
    }
}
