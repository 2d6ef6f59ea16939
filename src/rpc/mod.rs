//! Minimal JSON RPC layer shared by both directions of a streaming session.
//!
//! - `message`: wire frame types and inbound frame classification.
//! - `peer`: handler registry, pending-call table, and message routing.
//! - `wait`: bounded polling waiter for flag-style conditions.

pub mod message;
pub mod peer;
pub mod wait;

pub use message::{Frame, Params, Request, Response};
pub use peer::{CallMode, FrameSink, Handler, HandlerFuture, RpcPeer, DEFAULT_CALL_TIMEOUT};
pub use wait::wait_until;
