//! Method-call triples and batch envelopes.
//!
//! JMAP transports every operation as a triple `[name, arguments, clientTag]`
//! inside a batch envelope. The `clientTag` is the decimal index of the call
//! within its batch; responses echo the tag of the call they answer, so
//! correlation is a numeric parse rather than a lookup table.
//!
//! Any argument key beginning with `#` is a *result reference*: its value
//! selects part of an earlier response in the same request via a
//! [`ResultReference`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single method call inside a batch request.
///
/// Serializes to the wire triple `[name, arguments, clientTag]`.
///
/// # Examples
///
/// ```
/// use jmap_engine::core::types::MethodCall;
/// use serde_json::json;
///
/// let call = MethodCall::new("Email/get", json!({"accountId": "A1"}), "0");
/// let wire = serde_json::to_string(&call).unwrap();
/// assert_eq!(wire, r#"["Email/get",{"accountId":"A1"},"0"]"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Value, String)", into = "(String, Value, String)")]
pub struct MethodCall {
    /// `<Type>/<verb>` (e.g. `Email/get`) or a non-typed method name.
    pub name: String,

    /// The JSON argument object.
    pub arguments: Value,

    /// Decimal index of the call within its batch.
    pub client_tag: String,
}

impl From<(String, Value, String)> for MethodCall {
    fn from((name, arguments, client_tag): (String, Value, String)) -> Self {
        MethodCall {
            name,
            arguments,
            client_tag,
        }
    }
}

impl From<MethodCall> for (String, Value, String) {
    fn from(call: MethodCall) -> Self {
        (call.name, call.arguments, call.client_tag)
    }
}

impl MethodCall {
    /// Create a new method call.
    pub fn new(name: impl Into<String>, arguments: Value, client_tag: impl Into<String>) -> Self {
        MethodCall {
            name: name.into(),
            arguments,
            client_tag: client_tag.into(),
        }
    }

    /// The verb part of the method name (`get`, `set`, `changes`, ...).
    #[must_use]
    pub fn verb(&self) -> Option<&str> {
        self.name.split('/').nth(1)
    }

    /// Whether this call mutates server state (`/set` or `/copy`).
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(self.verb(), Some("set") | Some("copy"))
    }

    /// Whether any top-level argument is a `#`-prefixed result reference.
    #[must_use]
    pub fn has_back_reference(&self) -> bool {
        match &self.arguments {
            Value::Object(map) => map.keys().any(|k| k.starts_with('#')),
            _ => false,
        }
    }

    /// Numeric value of the client tag, if it parses.
    #[must_use]
    pub fn tag_index(&self) -> Option<usize> {
        self.client_tag.parse().ok()
    }
}

/// A single method response inside a batch response.
///
/// Shares the triple shape of [`MethodCall`]. A response named `"error"`
/// carries the JMAP error type in `arguments.type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Value, String)", into = "(String, Value, String)")]
pub struct MethodResponse {
    /// Method name, or `"error"`.
    pub name: String,

    /// The JSON result object, or the error object.
    pub arguments: Value,

    /// Echo of the originating call's client tag.
    pub client_tag: String,
}

impl From<(String, Value, String)> for MethodResponse {
    fn from((name, arguments, client_tag): (String, Value, String)) -> Self {
        MethodResponse {
            name,
            arguments,
            client_tag,
        }
    }
}

impl From<MethodResponse> for (String, Value, String) {
    fn from(response: MethodResponse) -> Self {
        (response.name, response.arguments, response.client_tag)
    }
}

impl MethodResponse {
    /// Create a new method response.
    pub fn new(name: impl Into<String>, arguments: Value, client_tag: impl Into<String>) -> Self {
        MethodResponse {
            name: name.into(),
            arguments,
            client_tag: client_tag.into(),
        }
    }

    /// Whether this is a method-level error response.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.name == "error"
    }

    /// The JMAP error type, for error responses.
    #[must_use]
    pub fn error_type(&self) -> Option<&str> {
        if self.is_error() {
            self.arguments.get("type").and_then(Value::as_str)
        } else {
            None
        }
    }

    /// Numeric value of the client tag, if it parses.
    #[must_use]
    pub fn tag_index(&self) -> Option<usize> {
        self.client_tag.parse().ok()
    }
}

/// A pointer-style back-reference into an earlier response of the same
/// request.
///
/// Placed under a `#`-prefixed argument key; the server substitutes the
/// values selected by `path` from the response to the call tagged
/// `result_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReference {
    /// Client tag of the referenced call.
    pub result_of: String,

    /// Method name the referenced response must carry.
    pub name: String,

    /// JSON Pointer into the referenced response's arguments.
    pub path: String,
}

impl ResultReference {
    /// Build a reference to the call tagged `result_of`.
    pub fn new(
        result_of: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        ResultReference {
            result_of: result_of.into(),
            name: name.into(),
            path: path.into(),
        }
    }
}

/// The batch request envelope POSTed to the JMAP API endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Capability URIs in force for this request.
    pub using: Vec<String>,

    /// The batched method calls, in order.
    pub method_calls: Vec<MethodCall>,

    /// Server-minted ids from earlier pages of a split batch, so later
    /// pages can refer to records created earlier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_ids: Option<BTreeMap<String, String>>,
}

/// The batch response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseEnvelope {
    /// Responses to the batch, in server execution order. Absent when the
    /// server rejected the batch as a whole.
    pub method_responses: Option<Vec<MethodResponse>>,

    /// Opaque token identifying the server's session object version.
    pub session_state: Option<String>,

    /// Ids minted for creations in this request.
    pub created_ids: Option<BTreeMap<String, String>>,
}
