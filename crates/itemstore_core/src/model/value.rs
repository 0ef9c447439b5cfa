//! Attribute values carried by items.
//!
//! # Invariants
//! - `Value` is self-describing (tagged) in its JSON form so persisted
//!   payloads decode without consulting the schema.
//! - Ordering is only defined between values of compatible types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Unix epoch milliseconds.
    DateTime(i64),
    Uuid(Uuid),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    DateTime,
    Uuid,
    /// Accepts any scalar or nested value.
    Any,
    /// Bidirectional item reference, stored in a `RefDict`, never as a `Value`.
    Ref,
}

impl Value {
    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::DateTime(_) => "date_time",
            Self::Uuid(_) => "uuid",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) | Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns whether this scalar value conforms to `value_type`.
    pub fn conforms_to(&self, value_type: ValueType) -> bool {
        matches!(
            (value_type, self),
            (ValueType::Any, _)
                | (ValueType::String, Self::String(_))
                | (ValueType::Integer, Self::Integer(_))
                | (ValueType::Float, Self::Float(_))
                | (ValueType::Float, Self::Integer(_))
                | (ValueType::Boolean, Self::Boolean(_))
                | (ValueType::DateTime, Self::DateTime(_))
                | (ValueType::Uuid, Self::Uuid(_))
        )
    }

    /// Number of elements for collections, characters for strings.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(value) => Some(value.chars().count()),
            Self::List(values) => Some(values.len()),
            Self::Dict(values) => Some(values.len()),
            _ => None,
        }
    }

    /// Compares two values when their types are comparable.
    ///
    /// Integers and floats compare numerically; date-times compare with each
    /// other and with integers. Everything else compares only with its own
    /// variant. Returns `None` for incomparable pairs.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b))
            | (Self::DateTime(a), Self::DateTime(b))
            | (Self::DateTime(a), Self::Integer(b))
            | (Self::Integer(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) if a == b => Some(Ordering::Equal),
            (Self::Dict(a), Self::Dict(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total order used to sort index keys.
    ///
    /// Agrees with `compare` wherever that returns an ordering. Unrelated
    /// types are ranked by type and NaN sorts after every other number.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a
                .partial_cmp(&b)
                .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()));
        }
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            _ => self.sort_rank().cmp(&other.sort_rank()),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(value) | Self::DateTime(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Self::Boolean(_) => 0,
            Self::Integer(_) | Self::Float(_) | Self::DateTime(_) => 1,
            Self::String(_) => 2,
            Self::Uuid(_) => 3,
            Self::List(_) => 4,
            Self::Dict(_) => 5,
        }
    }

    /// Collects the text fragments indexed by full-text search.
    pub(crate) fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::String(value) => out.push(value.as_str()),
            Self::List(values) => values.iter().for_each(|value| value.collect_text(out)),
            Self::Dict(values) => values.values().for_each(|value| value.collect_text(out)),
            _ => {}
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::DateTime => "date_time",
            Self::Uuid => "uuid",
            Self::Any => "any",
            Self::Ref => "ref",
        };
        f.write_str(label)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(value) => write!(f, "{value:?}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::DateTime(value) => write!(f, "@{value}"),
            Self::Uuid(value) => write!(f, "{value}"),
            Self::List(values) => {
                write!(f, "[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::Dict(values) => {
                write!(f, "{{")?;
                for (index, (key, value)) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Value, ValueType};
    use std::cmp::Ordering;

    #[test]
    fn numeric_values_compare_across_integer_and_float() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare(&Value::Integer(1)), None);
    }

    #[test]
    fn sort_order_ranks_types_and_agrees_with_compare() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(f64::NAN),
            Value::Integer(3),
            Value::Boolean(true),
            Value::Float(-0.5),
            Value::from("a"),
        ];
        values.sort_by(Value::sort_cmp);
        assert_eq!(values[0], Value::Boolean(true));
        assert_eq!(values[1], Value::Float(-0.5));
        assert_eq!(values[2], Value::Integer(3));
        assert!(matches!(values[3], Value::Float(value) if value.is_nan()));
        assert_eq!(values[4], Value::from("a"));
        assert_eq!(values[5], Value::from("b"));

        assert_eq!(
            Value::Float(-0.0).sort_cmp(&Value::Integer(0)),
            Ordering::Equal
        );
        assert_eq!(
            Value::DateTime(5).sort_cmp(&Value::Integer(7)),
            Ordering::Less
        );
    }

    #[test]
    fn integers_conform_to_float_attributes() {
        assert!(Value::Integer(3).conforms_to(ValueType::Float));
        assert!(!Value::Float(3.0).conforms_to(ValueType::Integer));
        assert!(Value::List(vec![]).conforms_to(ValueType::Any));
    }

    #[test]
    fn json_form_is_tagged() {
        let json = serde_json::to_string(&Value::DateTime(42)).unwrap();
        assert_eq!(json, r#"{"type":"date_time","value":42}"#);
    }
}
