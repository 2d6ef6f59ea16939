#![forbid(unsafe_code)]

//! `context-stream`: console client for a live agent context.
//!
//! Joins the configured context, prints streamed tokens to stdout, and sends
//! every line read from stdin as a new user message. Exits on stdin EOF or
//! Ctrl-C after closing the socket.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use context_stream::config::{self, StreamConfig};
use context_stream::rpc::wait_until;
use context_stream::{AppError, Result, StreamingService};

/// Poll interval while waiting for the socket to report closed.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "context-stream", about = "Live agent token streaming client", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Override the streaming URL from the configuration file.
    #[arg(long)]
    url: Option<String>,

    /// Override the context to join.
    #[arg(long)]
    context_id: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut stream_config = StreamConfig::load_from_path(&args.config)?;
    if let Some(url) = args.url {
        stream_config.streaming_url = url;
    }
    if let Some(context_id) = args.context_id {
        stream_config.context_id = context_id;
    }
    stream_config.validate()?;

    let access_token = config::load_access_token().await?;
    info!(context_id = %stream_config.context_id, "configuration loaded");

    // ── Wire callbacks and join ─────────────────────────
    let service = StreamingService::from_config(&stream_config, access_token);

    service.set_on_token(|push| {
        let mut stdout = std::io::stdout().lock();
        if write!(stdout, "{}", push.token).and_then(|()| stdout.flush()).is_err() {
            warn!("stdout closed, token dropped");
        }
    });
    service.set_on_tool_call(|push| {
        info!(id = %push.id, name = %push.name, input = %push.input, "tool call");
    });
    service.set_on_tool_response(|push| {
        info!(id = %push.id, name = %push.name, output = %push.output, "tool response");
    });
    service.set_on_events(|push| {
        info!(
            count = push.events.len(),
            response_id = push.response_id.as_deref().unwrap_or(""),
            "events"
        );
    });

    service.connect().await.map_err(|err| {
        error!(%err, "failed to join context");
        err
    })?;
    info!("context joined; type a message and press enter");

    // ── Forward stdin until EOF or shutdown ─────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            () = service.closed() => {
                warn!("connection closed by server");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => service.add_message(&line)?,
                    None => {
                        info!("stdin closed");
                        break;
                    }
                }
            }
        }
    }

    // ── Close and wait briefly for the handshake ────────
    service.close();
    let closed = wait_until(
        || !service.is_open(),
        stream_config.timeouts.close_grace(),
        CLOSE_POLL_INTERVAL,
    )
    .await;
    if !closed {
        warn!("socket did not close within the grace period");
    }

    info!("context-stream shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the token stream.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
