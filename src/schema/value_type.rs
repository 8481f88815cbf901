//! Value types a schema property can be declared with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
}

impl ValueType {
    /// The value existing nodes receive when a property is registered.
    pub fn default_value(self) -> Value {
        match self {
            ValueType::String => Value::String(String::new()),
            ValueType::Integer => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Boolean => Value::Bool(false),
        }
    }

    /// Infer the type of a concrete value. Null and containers have none.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(ValueType::String),
            Value::Int(_) => Some(ValueType::Integer),
            Value::Float(_) => Some(ValueType::Float),
            Value::Bool(_) => Some(ValueType::Boolean),
            _ => None,
        }
    }

    /// Whether `value` may be stored under this type. Integers widen to floats.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ValueType::String, Value::String(_))
                | (ValueType::Integer, Value::Int(_))
                | (ValueType::Float, Value::Float(_) | Value::Int(_))
                | (ValueType::Boolean, Value::Bool(_))
        )
    }

    /// Convert `value` to this type, or fail with a `TypeError`.
    pub fn coerce(self, value: Value) -> Result<Value> {
        match (self, value) {
            (ValueType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (t, v) if t.accepts(&v) => Ok(v),
            (t, v) => Err(Error::TypeError { expected: t.to_string(), got: v.type_name().into() }),
        }
    }

    /// Two inferred types that may share one column.
    pub fn unify(self, other: ValueType) -> Option<ValueType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ValueType::Integer, ValueType::Float) | (ValueType::Float, ValueType::Integer) => {
                Some(ValueType::Float)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(ValueType::String),
            "integer" | "int" => Ok(ValueType::Integer),
            "float" | "double" => Ok(ValueType::Float),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            other => Err(Error::Schema(format!("unknown value type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(ValueType::String.default_value(), Value::from(""));
        assert_eq!(ValueType::Integer.default_value(), Value::Int(0));
        assert_eq!(ValueType::Boolean.default_value(), Value::Bool(false));
    }

    #[test]
    fn test_integer_widens_to_float() {
        assert_eq!(ValueType::Float.coerce(Value::Int(3)).unwrap(), Value::Float(3.0));
        assert!(ValueType::Integer.coerce(Value::Float(3.5)).is_err());
        assert_eq!(ValueType::Integer.unify(ValueType::Float), Some(ValueType::Float));
        assert_eq!(ValueType::String.unify(ValueType::Float), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("int".parse::<ValueType>().unwrap(), ValueType::Integer);
        assert!("list".parse::<ValueType>().is_err());
    }
}
