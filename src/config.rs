//! Session configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::{AppError, Result};

/// Keychain service under which the access token is stored.
pub const KEYRING_SERVICE: &str = "context-stream";

/// Keychain entry holding the access token.
pub const KEYRING_TOKEN_KEY: &str = "access_token";

/// Environment variable consulted when the keychain has no token.
pub const TOKEN_ENV_VAR: &str = "CONTEXT_STREAM_ACCESS_TOKEN";

/// Configurable timeout values for the streaming session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Window for a correlated call to receive its response.
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,
    /// Window for the WebSocket opening handshake.
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// How long the console client waits for the socket to close on exit.
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

impl TimeoutConfig {
    /// Correlated call timeout as a [`Duration`].
    #[must_use]
    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_seconds)
    }

    /// Close grace period as a [`Duration`].
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_ms: default_call_ms(),
            connect_seconds: default_connect_seconds(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

fn default_call_ms() -> u64 {
    5000
}

fn default_connect_seconds() -> u64 {
    10
}

fn default_close_grace_ms() -> u64 {
    2000
}

/// Streaming session configuration parsed from `config.toml`.
///
/// The access token is not read from the file; it is loaded at runtime through
/// [`load_access_token`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// WebSocket endpoint of the streaming server (`ws://` or `wss://`).
    pub streaming_url: String,
    /// Conversational context to join.
    pub context_id: String,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl StreamConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the fields that serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        validate_streaming_url(&self.streaming_url)?;

        if self.context_id.trim().is_empty() {
            return Err(AppError::Config("context_id must not be empty".into()));
        }

        if self.timeouts.call_ms == 0 {
            return Err(AppError::Config(
                "timeouts.call_ms must be greater than zero".into(),
            ));
        }

        if self.timeouts.connect_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.connect_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Check that `raw` parses as a `ws://` or `wss://` URL.
///
/// # Errors
///
/// Returns `AppError::Config` if the URL is malformed or uses another scheme.
pub fn validate_streaming_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|err| AppError::Config(format!("streaming_url invalid: {err}")))?;

    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(AppError::Config(format!(
            "streaming_url must use ws:// or wss://, got: {}",
            url.scheme()
        )));
    }

    Ok(url)
}

/// Load the access token from the OS keychain with env-var fallback.
///
/// # Errors
///
/// Returns `AppError::Config` if neither the keychain nor
/// [`TOKEN_ENV_VAR`] provides a non-empty token.
pub async fn load_access_token() -> Result<String> {
    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(|| {
        keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKEN_KEY)
            .and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = KEYRING_TOKEN_KEY, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = KEYRING_TOKEN_KEY,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    token_from_env()
}

/// Read the access token from [`TOKEN_ENV_VAR`].
///
/// # Errors
///
/// Returns `AppError::Config` if the variable is unset or empty.
pub fn token_from_env() -> Result<String> {
    match env::var(TOKEN_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {KEYRING_TOKEN_KEY} not found in keychain or {TOKEN_ENV_VAR} env var"
        ))),
    }
}
