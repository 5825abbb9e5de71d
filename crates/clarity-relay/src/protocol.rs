//! Wire types for the newline-delimited JSON protocol spoken to the worker.
//!
//! Each outbound request is one JSON object terminated by `\n`; the worker
//! echoes the request `id` in its response object. Matching is strictly by
//! identifier, including its JSON type: the numeric id `1` never matches the
//! string id `"1"`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-chosen request identifier.
///
/// Identifiers are compared exactly, variant included, mirroring JSON
/// equality between a number and a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// A numeric identifier.
    Number(i64),
    /// A string identifier.
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// An RPC request forwarded to the bridge worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Unique identifier among currently pending requests.
    pub id: RequestId,
    /// The tool or operation to invoke.
    pub method: String,
    /// Optional parameters forwarded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Creates a request with the given identifier and method.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Extracts the response identifier from a parsed worker message, if any.
pub(crate) fn response_id(value: &Value) -> Option<RequestId> {
    value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value(id).ok())
}
