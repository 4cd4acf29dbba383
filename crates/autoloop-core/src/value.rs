//! Typed argument values for action invocations
//!
//! Remote action calls and script invocations carry named arguments with a
//! declared type. ArgValue covers the eight wire types; ArgMap is the
//! name-to-value binding captured by each run at start.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Argument bindings for one invocation (name -> value)
///
/// Copied at run start so concurrent runs of the same graph never alias.
pub type ArgMap = HashMap<String, ArgValue>;

/// Errors converting between ArgValue and JSON values
#[derive(Debug, Clone, Error)]
pub enum ArgValueError {
    #[error("unsupported JSON value for argument: {0}")]
    Unsupported(String),

    #[error("mixed-type array is not a valid argument value")]
    MixedArray,
}

/// A typed argument value
///
/// Matches the declared argument types of the remote action interface:
/// string, int, bool, float, and the four array variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl ArgValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric accessor: ints widen to f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ArgValue::Float(f) => Some(*f),
            ArgValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert from a JSON value
    ///
    /// Null, objects, and heterogeneous arrays are not representable on the
    /// wire and are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ArgValueError> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ArgValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ArgValue::Float(f))
                } else {
                    Err(ArgValueError::Unsupported(n.to_string()))
                }
            }
            Value::String(s) => Ok(ArgValue::String(s.clone())),
            Value::Array(items) => Self::array_from_json(items),
            other => Err(ArgValueError::Unsupported(other.to_string())),
        }
    }

    fn array_from_json(items: &[serde_json::Value]) -> Result<Self, ArgValueError> {
        use serde_json::Value;
        let Some(first) = items.first() else {
            // Empty arrays default to the string variant
            return Ok(ArgValue::StringArray(Vec::new()));
        };
        match first {
            Value::Bool(_) => items
                .iter()
                .map(|v| v.as_bool().ok_or(ArgValueError::MixedArray))
                .collect::<Result<_, _>>()
                .map(ArgValue::BoolArray),
            Value::Number(n) if n.as_i64().is_some() => items
                .iter()
                .map(|v| v.as_i64().ok_or(ArgValueError::MixedArray))
                .collect::<Result<_, _>>()
                .map(ArgValue::IntArray),
            Value::Number(_) => items
                .iter()
                .map(|v| v.as_f64().ok_or(ArgValueError::MixedArray))
                .collect::<Result<_, _>>()
                .map(ArgValue::FloatArray),
            Value::String(_) => items
                .iter()
                .map(|v| v.as_str().map(String::from).ok_or(ArgValueError::MixedArray))
                .collect::<Result<_, _>>()
                .map(ArgValue::StringArray),
            other => Err(ArgValueError::Unsupported(other.to_string())),
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}
