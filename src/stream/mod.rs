//! Live token streaming for one conversational context.
//!
//! [`StreamingService`] composes a [`Transport`](crate::transport::Transport)
//! and an [`RpcPeer`](crate::rpc::RpcPeer): it joins a context with a
//! correlated `connect_to_context` call, forwards server pushes to user
//! callbacks, and sends user messages as `add_message` notifications.
//!
//! Submodules:
//! - `events`: method names and typed payloads.
//! - `service`: the service itself.

pub mod events;
pub mod service;

pub use events::{
    AddMessage, ConnectToContext, EventsPush, PushEvent, TokenPush, ToolCallPush, ToolResponsePush,
};
pub use service::{StreamingService, TransportFactory};
