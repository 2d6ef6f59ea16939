//! WebSocket transport built on `tokio-tungstenite`.
//!
//! After the opening handshake the socket is split into two tasks:
//!
//! - a writer task draining an unbounded [`mpsc`] channel of outbound frames
//!   into the sink, and
//! - a reader task handing every inbound text frame to the registered
//!   message callback.
//!
//! Both tasks share a [`CancellationToken`]. The reader owns the end of the
//! connection: when the stream ends for any reason it marks the transport
//! closed, cancels the writer, and fires the close callback exactly once.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{CloseCallback, ConnectionState, MessageCallback, Transport};
use crate::{AppError, Result};

/// Default window for the WebSocket opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the transport handle and its reader task.
struct Shared {
    state: Mutex<ConnectionState>,
    on_message: Mutex<Option<MessageCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    fn set_state(&self, next: ConnectionState) {
        *self.lock_state() = next;
    }

    fn deliver(&self, frame: String) {
        let callback = self
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match callback {
            Some(callback) => callback(frame),
            None => debug!("ws transport: no message callback, dropping inbound frame"),
        }
    }

    fn fire_close(&self) {
        let callback = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(callback) = callback {
            callback();
        }
    }
}

/// [`Transport`] over a single client WebSocket connection.
pub struct WsTransport {
    url: String,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("url", &self.url)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Create a transport for `url`. No network activity happens until
    /// [`Transport::connect`].
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Idle),
                on_message: Mutex::new(None),
                on_close: Mutex::new(None),
            }),
            outbound: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the opening handshake timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Endpoint this transport connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Message>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            if *state != ConnectionState::Idle {
                return Err(AppError::Transport(format!(
                    "connect called on a transport in state {:?}",
                    *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        info!(url = %self.url, "ws transport: connecting");

        let ws = match tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                self.shared.set_state(ConnectionState::Closed);
                return Err(AppError::Transport(format!(
                    "failed to open {}: {e}",
                    self.url
                )));
            }
            Err(_elapsed) => {
                self.shared.set_state(ConnectionState::Closed);
                return Err(AppError::Transport(format!(
                    "timed out after {:?} opening {}",
                    self.connect_timeout, self.url
                )));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();

        let opened = {
            let mut state = self.shared.lock_state();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                *self.lock_outbound() = Some(tx);
                true
            } else {
                false
            }
        };

        if !opened {
            // close() raced the handshake.
            let mut ws = ws;
            if let Err(e) = ws.close(None).await {
                debug!(url = %self.url, error = %e, "ws transport: close after aborted connect failed");
            }
            return Err(AppError::Transport(format!(
                "transport closed while connecting to {}",
                self.url
            )));
        }

        let (sink, stream) = ws.split();

        tokio::spawn(run_writer(self.url.clone(), sink, rx, self.cancel.clone()));
        tokio::spawn(run_reader(
            self.url.clone(),
            stream,
            Arc::clone(&self.shared),
            self.cancel.clone(),
        ));

        info!(url = %self.url, "ws transport: open");
        Ok(())
    }
}

impl Transport for WsTransport {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.open())
    }

    fn send(&self, frame: String) {
        if self.shared.state() != ConnectionState::Open {
            warn!(url = %self.url, "ws transport: socket not open, dropping outbound frame");
            return;
        }

        let outbound = self.lock_outbound();
        let Some(tx) = outbound.as_ref() else {
            warn!(url = %self.url, "ws transport: no writer, dropping outbound frame");
            return;
        };

        if tx.send(Message::Text(frame.into())).is_err() {
            warn!(url = %self.url, "ws transport: writer stopped, dropping outbound frame");
        }
    }

    fn set_on_message(&self, callback: MessageCallback) {
        *self
            .shared
            .on_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn set_on_close(&self, callback: CloseCallback) {
        *self
            .shared
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn close(&self) {
        let mut state = self.shared.lock_state();
        let current = *state;

        match current {
            ConnectionState::Idle | ConnectionState::Connecting => {
                *state = ConnectionState::Closed;
                debug!(url = %self.url, ?current, "ws transport: closed before opening");
            }
            ConnectionState::Open => {
                *state = ConnectionState::Closing;
                drop(state);

                // Dropping the sender after the close frame lets the writer
                // finish once it has flushed it.
                if let Some(tx) = self.lock_outbound().take() {
                    if tx.send(Message::Close(None)).is_err() {
                        debug!(url = %self.url, "ws transport: writer already stopped");
                    }
                }
                info!(url = %self.url, "ws transport: close requested");
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                debug!(url = %self.url, ?current, "ws transport: close already in progress");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.shared.state() == ConnectionState::Open
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Socket tasks ──────────────────────────────────────────────────────────────

/// Writer task: forwards queued outbound frames to the socket.
///
/// Exits when `cancel` fires, when the channel closes, after a close frame
/// has been written, or on the first write error.
async fn run_writer(
    url: String,
    mut sink: SplitSink<WsStream, Message>,
    mut msg_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(url, "ws writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(message) = msg else {
                    debug!(url, "ws writer: outbound channel closed, stopping");
                    break;
                };

                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!(url, error = %e, "ws writer: write failed");
                    break;
                }
                if closing {
                    debug!(url, "ws writer: close frame sent");
                    break;
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!(url, error = %e, "ws writer: sink close failed");
    }
}

/// Reader task: hands inbound text frames to the message callback.
///
/// Keeps reading after a close frame so the closing handshake completes, then
/// marks the transport closed and fires the close callback.
async fn run_reader(
    url: String,
    mut stream: SplitStream<WsStream>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(url, "ws reader: cancellation received, stopping");
                break;
            }

            item = stream.next() => {
                match item {
                    None => {
                        debug!(url, "ws reader: stream ended");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => shared.deliver(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => {
                        warn!(url, bytes = data.len(), "ws reader: ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(url, ?frame, "ws reader: close frame received");
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite itself.
                    }
                    Some(Err(e)) => {
                        warn!(url, error = %e, "ws reader: read failed, stopping");
                        break;
                    }
                }
            }
        }
    }

    shared.set_state(ConnectionState::Closed);
    cancel.cancel();
    info!(url, "ws transport: closed");
    shared.fire_close();
}
