//! Table schema, field definitions, and predicate/query shapes.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Schema for a single replicated table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name, unique within a `ReplicationManager`.
    pub name: String,
    /// Schema version; a version bump on the server forces a full resync.
    pub version: u32,
    /// Field definitions that comprise this table's schema.
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    #[must_use]
    pub fn indexed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.indexed)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Checks that every required field is present and non-null in `fields`.
    #[must_use]
    pub fn validate(&self, fields: &std::collections::BTreeMap<String, Value>) -> ValidationResult {
        let errors: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| fields.get(&f.name).map_or(true, Value::is_null))
            .map(|f| format!("missing required field `{}`", f.name))
            .collect();
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

/// Single field definition within a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Whether the field must be present on every row.
    pub required: bool,
    /// Whether the durable store maintains a secondary index on this field.
    pub indexed: bool,
}

/// Result of validating a row against a table schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid { errors: Vec<String> },
}

/// Comparison operator for a leaf predicate node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredicateOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    In,
}

/// A predicate expression tree used to filter rows for a query or a sync shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Predicate {
    Field {
        field: String,
        op: PredicateOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluates this predicate against a row's field map.
    #[must_use]
    pub fn matches(&self, fields: &std::collections::BTreeMap<String, Value>) -> bool {
        match self {
            Predicate::Field { field, op, value } => {
                let actual = fields.get(field).unwrap_or(&Value::Null);
                match op {
                    PredicateOp::Eq => actual == value,
                    PredicateOp::Ne => actual != value,
                    PredicateOp::Lt => actual.partial_cmp_value(value) == std::cmp::Ordering::Less,
                    PredicateOp::Lte => {
                        actual.partial_cmp_value(value) != std::cmp::Ordering::Greater
                    }
                    PredicateOp::Gt => {
                        actual.partial_cmp_value(value) == std::cmp::Ordering::Greater
                    }
                    PredicateOp::Gte => {
                        actual.partial_cmp_value(value) != std::cmp::Ordering::Less
                    }
                    PredicateOp::Contains => match (actual, value) {
                        (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
                        (Value::Array(items), needle) => items.contains(needle),
                        _ => false,
                    },
                    PredicateOp::In => match value {
                        Value::Array(items) => items.contains(actual),
                        _ => false,
                    },
                }
            }
            Predicate::And(items) => items.iter().all(|p| p.matches(fields)),
            Predicate::Or(items) => items.iter().any(|p| p.matches(fields)),
            Predicate::Not(inner) => !inner.matches(fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn eq_predicate_matches() {
        let p = Predicate::Field {
            field: "status".into(),
            op: PredicateOp::Eq,
            value: Value::String("done".into()),
        };
        assert!(p.matches(&fields(&[("status", Value::String("done".into()))])));
        assert!(!p.matches(&fields(&[("status", Value::String("pending".into()))])));
    }

    #[test]
    fn and_or_not_compose() {
        let p = Predicate::And(vec![
            Predicate::Field { field: "a".into(), op: PredicateOp::Gt, value: Value::Int(1) },
            Predicate::Not(Box::new(Predicate::Field {
                field: "b".into(),
                op: PredicateOp::Eq,
                value: Value::Bool(true),
            })),
        ]);
        assert!(p.matches(&fields(&[("a", Value::Int(2)), ("b", Value::Bool(false))])));
        assert!(!p.matches(&fields(&[("a", Value::Int(2)), ("b", Value::Bool(true))])));
    }

    #[test]
    fn missing_field_treated_as_null() {
        let p = Predicate::Field { field: "missing".into(), op: PredicateOp::Eq, value: Value::Null };
        assert!(p.matches(&fields(&[])));
    }

    #[test]
    fn validate_flags_missing_required_fields() {
        let schema = TableSchema {
            name: "todos".into(),
            version: 1,
            fields: vec![
                FieldDef { name: "title".into(), required: true, indexed: false },
                FieldDef { name: "notes".into(), required: false, indexed: false },
            ],
        };
        assert_eq!(
            schema.validate(&fields(&[("title", Value::String("buy milk".into()))])),
            ValidationResult::Valid
        );
        let result = schema.validate(&fields(&[("notes", Value::String("x".into()))]));
        assert_eq!(
            result,
            ValidationResult::Invalid { errors: vec!["missing required field `title`".into()] }
        );
    }

    #[test]
    fn validate_treats_null_required_field_as_missing() {
        let schema = TableSchema {
            name: "todos".into(),
            version: 1,
            fields: vec![FieldDef { name: "title".into(), required: true, indexed: false }],
        };
        let result = schema.validate(&fields(&[("title", Value::Null)]));
        assert!(matches!(result, ValidationResult::Invalid { .. }));
    }
}
