#![forbid(unsafe_code)]

//! Bidirectional JSON RPC over a single WebSocket, and the live token
//! streaming session built on it.
//!
//! - [`transport`]: socket ownership behind the [`Transport`](transport::Transport) seam.
//! - [`rpc`]: correlated calls, notifications, and push-handler dispatch.
//! - [`stream`]: the context streaming service.

pub mod config;
pub mod errors;
pub mod rpc;
pub mod stream;
pub mod transport;

pub use config::StreamConfig;
pub use errors::{AppError, Result};
pub use stream::StreamingService;
