//! Socket transport abstraction.
//!
//! A [`Transport`] owns exactly one connection and decouples the RPC peer
//! from raw socket events: it exposes a best-effort `send`, a single
//! inbound-frame callback, and a single close callback. Registering a second
//! callback of either kind replaces the first; there is no multicast.
//!
//! Submodules:
//! - `ws`: [`WsTransport`](ws::WsTransport), the `tokio-tungstenite`
//!   implementation used by the streaming service.

pub mod ws;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::Result;

pub use ws::WsTransport;

/// Callback invoked with every inbound text frame.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback invoked once when the connection ends.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle of a single transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, `connect` not yet called.
    Idle,
    /// Opening handshake in progress.
    Connecting,
    /// Ready to send and receive.
    Open,
    /// Close requested, waiting for the socket to finish.
    Closing,
    /// Terminal: closed, failed to open, or closed before opening.
    Closed,
}

/// One persistent, message-oriented connection.
pub trait Transport: Send + Sync {
    /// Open the connection.
    ///
    /// Resolves once the connection is ready for traffic. Only the first call
    /// on an instance can succeed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// connection fails to open, or if `connect` was already called.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Send one text frame, best-effort.
    ///
    /// When the connection is not open the frame is dropped with a warning;
    /// frames are never queued for later or retried.
    fn send(&self, frame: String);

    /// Replace the inbound-frame callback.
    fn set_on_message(&self, callback: MessageCallback);

    /// Replace the close callback.
    fn set_on_close(&self, callback: CloseCallback);

    /// Request closure. Idempotent, including before `connect`.
    fn close(&self);

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}
