//! Wire frames exchanged by two [`RpcPeer`](crate::rpc::peer::RpcPeer)s.
//!
//! Every frame is a single JSON object sent as one WebSocket text frame.
//! Two disjoint shapes share the channel:
//!
//! | Shape        | Fields                          | Meaning                    |
//! |--------------|---------------------------------|----------------------------|
//! | Request      | `method`, `params`, `id`        | correlated call            |
//! | Notification | `method`, `params`              | fire-and-forget            |
//! | Response     | `id`, `result`                  | answer to a correlated call|
//!
//! By convention `result.error` (a string) marks a handler-side failure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Keyed parameter and result payload. Key insertion order is preserved.
pub type Params = Map<String, Value>;

/// Outbound or inbound request. A missing `id` makes it a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name the receiving peer dispatches on.
    pub method: String,
    /// Method-specific payload.
    pub params: Params,
    /// Correlation id; `None` for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Request {
    /// Build a notification (no id, no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Params) -> Self {
        Self {
            method: method.into(),
            params,
            id: None,
        }
    }

    /// Build a correlated request.
    #[must_use]
    pub fn correlated(method: impl Into<String>, params: Params, id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params,
            id: Some(id.into()),
        }
    }
}

/// Outbound response to a correlated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id copied from the request being answered.
    pub id: String,
    /// Handler result, or `{ "error": "..." }` on failure.
    pub result: Params,
}

impl Response {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn success(id: impl Into<String>, result: Params) -> Self {
        Self {
            id: id.into(),
            result,
        }
    }

    /// Failed response carrying `result.error = message`.
    #[must_use]
    pub fn failure(id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Params::new();
        result.insert("error".into(), Value::String(message.into()));
        Self {
            id: id.into(),
            result,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Request or notification for a local handler.
    Request(Request),
    /// Response to one of our correlated calls.
    Response {
        /// Correlation id, if the frame carried a string id.
        id: Option<String>,
        /// Result payload; a missing or `null` result becomes `{}`. A result
        /// of any other non-object type is carried as a protocol error so the
        /// waiting call fails instead of timing out.
        result: Result<Params>,
    },
}

impl Frame {
    /// Parse and classify one inbound text frame.
    ///
    /// An object carrying both `method` and `params` is a request; anything
    /// else is treated as a response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`]`("malformed json: …")` if `raw` is not JSON.
    /// - [`AppError::Protocol`] if the frame is not an object, or a request's
    ///   `method`/`params` has the wrong type.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

        let Value::Object(mut object) = value else {
            return Err(AppError::Protocol("frame is not a json object".into()));
        };

        if object.contains_key("method") && object.contains_key("params") {
            let request: Request = serde_json::from_value(Value::Object(object))
                .map_err(|e| AppError::Protocol(format!("invalid request frame: {e}")))?;
            return Ok(Self::Request(request));
        }

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let result = match object.remove("result") {
            None | Some(Value::Null) => Ok(Params::new()),
            Some(Value::Object(result)) => Ok(result),
            Some(other) => Err(AppError::Protocol(format!(
                "response result must be an object, got: {other}"
            ))),
        };

        Ok(Self::Response { id, result })
    }
}

/// Extract the remote error text from a response `result`, if any.
///
/// String errors are returned as-is; any other non-null value is rendered as
/// JSON text so that no failure is silently treated as success.
#[must_use]
pub fn remote_error(result: &Params) -> Option<String> {
    match result.get("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(message.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Serialise `params` into a keyed payload.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if `params` does not serialise to a JSON
/// object.
pub fn to_params<P: Serialize>(params: &P) -> Result<Params> {
    match serde_json::to_value(params)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(AppError::Protocol(format!(
            "params must serialise to a json object, got: {other}"
        ))),
    }
}
