//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing, validation, or credential lookup failure.
    Config(String),
    /// Socket failed to open, closed mid-flight, or is not connected.
    Transport(String),
    /// A frame or payload did not match the wire protocol.
    Protocol(String),
    /// No response arrived for a correlated call within its window.
    Timeout {
        /// Method the caller was waiting on.
        method: String,
    },
    /// The remote side answered a correlated call with `result.error`.
    Remote {
        /// Method the failed call was issued for.
        method: String,
        /// Error text reported by the remote handler.
        message: String,
    },
    /// A locally registered handler rejected an inbound request.
    Handler(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Text placed under `result.error` when this error answers a request.
    ///
    /// Handler errors travel verbatim; everything else keeps its category
    /// prefix so the remote side can tell them apart.
    #[must_use]
    pub fn remote_message(&self) -> String {
        match self {
            Self::Handler(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout { method } => {
                write!(f, "timeout: Timeout waiting for response to {method}")
            }
            Self::Remote { method, message } => write!(f, "remote: {method} failed: {message}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
