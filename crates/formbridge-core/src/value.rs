//! Runtime value type for formbridge records and configuration
//!
//! The `Value` enum represents all values the engines move around,
//! similar to JSON values. "Exactly undefined" (a getter producing no
//! value at all) is represented as `Option<Value>::None` everywhere and
//! is deliberately distinct from `Value::Null`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Number value (f64, handles both int and float)
    Number(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Object (key-value map)
    Object(HashMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    /// Boolean coercion used by the `true`/`false` condition operators.
    ///
    /// Null is false, numbers are true unless zero or NaN, strings are
    /// true unless empty, arrays and objects are always true.
    pub fn as_bool_coerce(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Numeric coercion: numbers as-is, numeric strings parsed,
    /// booleans as 0/1. Everything else is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the array content, if this is an array.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the object content, if this is an object.
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// String form used for regexp matching and row-key comparison.
    ///
    /// Whole numbers render without a trailing `.0` so that ids keep
    /// their canonical form.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Emptiness test for the `empty` condition operator.
    ///
    /// Null is always empty. Strings are empty when they have no
    /// characters, optionally after trimming. Arrays and objects count
    /// as empty only when `empty_collections` is set.
    pub fn is_empty_value(&self, trim: bool, empty_collections: bool) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => {
                if trim {
                    s.trim().is_empty()
                } else {
                    s.is_empty()
                }
            }
            Value::Array(items) => empty_collections && items.is_empty(),
            Value::Object(map) => empty_collections && map.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }

    /// Loose equality used by the `equal` operator and allow-set
    /// membership tests: same-variant equality first, then numeric
    /// coercion, then string forms.
    pub fn loose_eq(&self, other: &Value) -> bool {
        if self == other {
            return true;
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        match (self, other) {
            (Value::Array(_), _)
            | (_, Value::Array(_))
            | (Value::Object(_), _)
            | (_, Value::Object(_)) => false,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.to_display_string() == other.to_display_string(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
