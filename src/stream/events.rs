//! Typed payloads for the context streaming methods.
//!
//! # Methods
//!
//! | Method               | Direction        | Kind         | Payload               |
//! |----------------------|------------------|--------------|-----------------------|
//! | `connect_to_context` | client → server  | correlated   | [`ConnectToContext`]  |
//! | `add_message`        | client → server  | notification | [`AddMessage`]        |
//! | `on_token`           | server → client  | push         | [`TokenPush`]         |
//! | `on_tool_call`       | server → client  | push         | [`ToolCallPush`]      |
//! | `on_tool_response`   | server → client  | push         | [`ToolResponsePush`]  |
//! | `on_events`          | server → client  | push         | [`EventsPush`]        |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlated call joining a conversational context.
pub const CONNECT_TO_CONTEXT: &str = "connect_to_context";
/// Notification carrying a new user message.
pub const ADD_MESSAGE: &str = "add_message";
/// Push: one streamed token.
pub const ON_TOKEN: &str = "on_token";
/// Push: the agent invoked a tool.
pub const ON_TOOL_CALL: &str = "on_tool_call";
/// Push: a tool produced its output.
pub const ON_TOOL_RESPONSE: &str = "on_tool_response";
/// Push: a batch of agent events.
pub const ON_EVENTS: &str = "on_events";

/// Push methods the streaming service registers handlers for.
pub const PUSH_METHODS: [&str; 4] = [ON_TOKEN, ON_TOOL_CALL, ON_TOOL_RESPONSE, ON_EVENTS];

/// Params of `connect_to_context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectToContext {
    /// Context to join.
    pub context_id: String,
    /// Bearer token authorising the session.
    pub access_token: String,
}

/// Params of `add_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMessage {
    /// User message text.
    pub message: String,
}

/// Params of `on_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPush {
    /// Token text to append to the current response.
    pub token: String,
    /// Response the token belongs to.
    #[serde(default)]
    pub response_id: Option<String>,
}

/// Params of `on_tool_call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPush {
    /// Tool invocation id, shared with the matching [`ToolResponsePush`].
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input as sent by the agent.
    #[serde(default)]
    pub input: Value,
}

/// Params of `on_tool_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponsePush {
    /// Tool invocation id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool output.
    #[serde(default)]
    pub output: Value,
}

/// Params of `on_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPush {
    /// Batched events, passed through untouched.
    pub events: Vec<Value>,
    /// Response the events belong to.
    #[serde(default)]
    pub response_id: Option<String>,
}

/// One server push, tagged by method.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// `on_token`
    Token(TokenPush),
    /// `on_tool_call`
    ToolCall(ToolCallPush),
    /// `on_tool_response`
    ToolResponse(ToolResponsePush),
    /// `on_events`
    Events(EventsPush),
}

impl PushEvent {
    /// Wire method name of this push.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Token(_) => ON_TOKEN,
            Self::ToolCall(_) => ON_TOOL_CALL,
            Self::ToolResponse(_) => ON_TOOL_RESPONSE,
            Self::Events(_) => ON_EVENTS,
        }
    }
}
