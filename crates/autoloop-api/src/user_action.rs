//! User action descriptors
//!
//! A user action is a remotely callable entry point with declared argument
//! types and a response-support mode. Descriptors are what the device
//! advertises to remote clients.

use autoloop_core::ArgValue;
use serde::{Deserialize, Serialize};

/// Declared type of a remote action argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    Bool,
    Int,
    Float,
    String,
    BoolArray,
    IntArray,
    FloatArray,
    StringArray,
}

impl ArgType {
    /// Whether a value conforms to this declared type.
    ///
    /// Ints are accepted where floats are declared, matching the widening
    /// the wire layer performs.
    pub fn matches(&self, value: &ArgValue) -> bool {
        matches!(
            (self, value),
            (ArgType::Bool, ArgValue::Bool(_))
                | (ArgType::Int, ArgValue::Int(_))
                | (ArgType::Float, ArgValue::Float(_))
                | (ArgType::Float, ArgValue::Int(_))
                | (ArgType::String, ArgValue::String(_))
                | (ArgType::BoolArray, ArgValue::BoolArray(_))
                | (ArgType::IntArray, ArgValue::IntArray(_))
                | (ArgType::FloatArray, ArgValue::FloatArray(_))
                | (ArgType::StringArray, ArgValue::StringArray(_))
        )
    }
}

/// One declared argument of a user action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
}

impl ArgDescriptor {
    pub fn new(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
        }
    }
}

/// Whether an action supports returning a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportsResponse {
    /// Action never returns a response
    #[default]
    None,
    /// Action returns only a success/error status, no payload
    Status,
    /// Action may optionally return a payload
    Optional,
    /// Action always returns a payload
    Only,
}

/// A remotely callable action descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAction {
    /// Stable key advertised to clients
    pub key: u32,

    /// Action name
    pub name: String,

    /// Declared arguments, in declaration order
    pub args: Vec<ArgDescriptor>,

    /// Response support mode
    pub supports_response: SupportsResponse,
}
