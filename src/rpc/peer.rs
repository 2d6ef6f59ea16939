//! Bidirectional RPC peer.
//!
//! One [`RpcPeer`] runs two independent message flows over a single frame
//! sink:
//!
//! - **Outbound calls.** [`RpcPeer::notify`] sends a frame without an id and
//!   returns at once. [`RpcPeer::request`] tags the frame with a fresh UUID,
//!   parks a `oneshot` sender in the pending table under that id, and awaits
//!   the matching response bounded by a timeout.
//! - **Inbound frames.** [`RpcPeer::handle_message`] parses each frame and
//!   either dispatches it to a registered handler (replying when the frame
//!   carried an id) or resolves the pending call it answers.
//!
//! Per call the state machine is `Sent → {Resolved | Errored | TimedOut |
//! Cancelled}`; the pending entry is removed on every terminal transition.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rpc::message::{remote_error, to_params, Frame, Params, Request, Response};
use crate::{AppError, Result};

/// Default window for a correlated call to receive its response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Function the peer hands every outbound frame to.
///
/// Sending is best-effort: the sink decides what to do with frames it cannot
/// deliver (the WebSocket transport logs and drops them).
pub type FrameSink = Arc<dyn Fn(String) + Send + Sync>;

/// Future returned by a registered handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Params>> + Send>>;

/// Registered handler for one inbound method.
pub type Handler = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

/// In-flight correlated calls keyed by request id.
type PendingMap = HashMap<String, oneshot::Sender<Result<Params>>>;

/// Completion of an inbound request: awaits the handler and sends any reply.
type ReplyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Whether an outbound call expects a correlated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Fire-and-forget: no id, no pending entry, no waiting.
    Notify,
    /// Correlated: wait up to the given duration for the response.
    Await(Duration),
}

struct PeerInner {
    sink: FrameSink,
    default_timeout: Duration,
    handlers: Mutex<HashMap<String, Handler>>,
    pending: Mutex<PendingMap>,
}

/// Bidirectional JSON RPC peer bound to one frame sink.
///
/// Cloning is cheap; clones share the handler registry and pending table.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

impl std::fmt::Debug for RpcPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPeer")
            .field("default_timeout", &self.inner.default_timeout)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl RpcPeer {
    /// Create a peer sending through `sink` with [`DEFAULT_CALL_TIMEOUT`].
    #[must_use]
    pub fn new(sink: FrameSink) -> Self {
        Self::with_timeout(sink, DEFAULT_CALL_TIMEOUT)
    }

    /// Create a peer sending through `sink` with a custom default timeout.
    #[must_use]
    pub fn with_timeout(sink: FrameSink, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                sink,
                default_timeout,
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Timeout applied by [`RpcPeer::request`].
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    // ── Handler registry ─────────────────────────────────────────────────────

    /// Register an async handler for `method`.
    ///
    /// A later registration for the same method replaces the earlier one.
    pub fn on<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> HandlerFuture + Send + Sync + 'static,
    {
        let method = method.into();
        let previous = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.clone(), Arc::new(handler));

        if previous.is_some() {
            debug!(method, "rpc peer: handler replaced");
        }
    }

    /// Register a typed, synchronous handler for `method`.
    ///
    /// Params are deserialised by field name into `P`, and the returned `R`
    /// must serialise to a JSON object (or unit, which becomes `{}`). The
    /// handler runs while the frame is being routed, so handlers registered
    /// this way observe frames strictly in arrival order.
    pub fn on_typed<P, R, F>(&self, method: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(P) -> Result<R> + Send + Sync + 'static,
    {
        let method = method.into();
        let label = method.clone();
        self.on(method, move |params| {
            let outcome = serde_json::from_value::<P>(Value::Object(params))
                .map_err(|e| AppError::Handler(format!("invalid params for {label}: {e}")))
                .and_then(&handler)
                .and_then(|value| to_params(&value));
            let ready: HandlerFuture = Box::pin(std::future::ready(outcome));
            ready
        });
    }

    /// Remove the handler for `method`. Returns whether one was registered.
    pub fn off(&self, method: &str) -> bool {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method)
            .is_some()
    }

    // ── Outbound calls ───────────────────────────────────────────────────────

    /// Issue a call in the given [`CallMode`].
    ///
    /// Returns `Ok(None)` for notifications and `Ok(Some(result))` for
    /// correlated calls.
    ///
    /// # Errors
    ///
    /// See [`RpcPeer::notify`] and [`RpcPeer::request_with_timeout`].
    pub async fn call<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        mode: CallMode,
    ) -> Result<Option<Params>> {
        match mode {
            CallMode::Notify => self.notify(method, params).map(|()| None),
            CallMode::Await(timeout) => self
                .request_with_timeout(method, params, timeout)
                .await
                .map(Some),
        }
    }

    /// Send a notification: no id, no pending entry, no waiting.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] only if `params` does not serialise to
    /// a JSON object. Delivery failures are not observable.
    pub fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<()> {
        let frame = Request::notification(method, to_params(params)?);
        self.send_frame(&frame)?;
        debug!(method, "rpc peer: notification sent");
        Ok(())
    }

    /// Issue a correlated call bounded by the default timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcPeer::request_with_timeout`].
    pub async fn request<P: Serialize>(&self, method: &str, params: &P) -> Result<Params> {
        self.request_with_timeout(method, params, self.inner.default_timeout)
            .await
    }

    /// Issue a correlated call and wait up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`] if `params` does not serialise to an object.
    /// - [`AppError::Timeout`] if no response arrives within `timeout`.
    /// - [`AppError::Remote`] if the response carries `result.error`.
    /// - [`AppError::Protocol`] if the response `result` is not an object.
    /// - [`AppError::Transport`] if the call was cancelled by
    ///   [`RpcPeer::cancel_pending`].
    pub async fn request_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<Params> {
        let params = to_params(params)?;
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        self.lock_pending().insert(id.clone(), tx);

        let frame = Request::correlated(method, params, id.clone());
        if let Err(err) = self.send_frame(&frame) {
            self.lock_pending().remove(&id);
            return Err(err);
        }
        debug!(method, id, "rpc peer: correlated call sent");

        let outcome = tokio::time::timeout(timeout, rx).await;

        // Terminal transition: the entry never outlives its call.
        self.lock_pending().remove(&id);

        match outcome {
            Ok(Ok(Ok(result))) => match remote_error(&result) {
                Some(message) => {
                    debug!(method, id, error = message.as_str(), "rpc peer: remote error");
                    Err(AppError::Remote {
                        method: method.to_owned(),
                        message,
                    })
                }
                None => Ok(result),
            },
            Ok(Ok(Err(e))) => {
                warn!(method, id, error = %e, "rpc peer: malformed response");
                Err(e)
            }
            Ok(Err(_)) => Err(AppError::Transport(format!(
                "connection closed while waiting for response to {method}"
            ))),
            Err(_elapsed) => {
                warn!(method, id, ?timeout, "rpc peer: correlated call timed out");
                Err(AppError::Timeout {
                    method: method.to_owned(),
                })
            }
        }
    }

    /// Fail every in-flight correlated call immediately.
    ///
    /// Waiting callers receive [`AppError::Transport`]. Returns the number of
    /// calls cancelled.
    pub fn cancel_pending(&self) -> usize {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "rpc peer: cancelling pending calls");
        }
        // Dropping each sender wakes its receiver with `RecvError`.
        drained.len()
    }

    /// Number of correlated calls currently awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    // ── Inbound frames ───────────────────────────────────────────────────────

    /// Route one inbound frame and wait for any handler reply to be sent.
    ///
    /// Never fails: malformed frames, unknown methods, and responses for
    /// unknown ids are logged and dropped.
    pub async fn handle_message(&self, raw: &str) {
        if let Some(reply) = self.route(raw) {
            reply.await;
        }
    }

    /// Route one inbound frame without waiting for handler completion.
    ///
    /// Responses are resolved and handlers invoked before this returns; only
    /// the awaiting of the handler's future and the reply it produces are
    /// spawned onto the runtime, so a slow handler never stalls the reader.
    /// Must be called from within a Tokio runtime.
    pub fn dispatch_message(&self, raw: &str) {
        if let Some(reply) = self.route(raw) {
            tokio::spawn(reply);
        }
    }

    fn route(&self, raw: &str) -> Option<ReplyFuture> {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, raw, "rpc peer: dropping unparseable frame");
                return None;
            }
        };

        match frame {
            Frame::Request(request) => self.route_request(request),
            Frame::Response { id, result } => {
                self.resolve(id, result);
                None
            }
        }
    }

    fn route_request(&self, request: Request) -> Option<ReplyFuture> {
        let Request { method, params, id } = request;

        let handler = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&method)
            .cloned();

        let Some(handler) = handler else {
            warn!(method, ?id, "rpc peer: no handler registered, dropping frame");
            return None;
        };

        let pending_reply = handler(params);
        let sink = Arc::clone(&self.inner.sink);

        Some(Box::pin(async move {
            let outcome = pending_reply.await;

            let Some(id) = id else {
                if let Err(e) = outcome {
                    warn!(method, error = %e, "rpc peer: notification handler failed");
                }
                return;
            };

            let response = match outcome {
                Ok(result) => Response::success(id, result),
                Err(e) => {
                    debug!(method, id, error = %e, "rpc peer: handler failed, replying with error");
                    Response::failure(id, e.remote_message())
                }
            };

            match serde_json::to_string(&response) {
                Ok(text) => sink(text),
                Err(e) => warn!(method, error = %e, "rpc peer: failed to serialise reply"),
            }
        }))
    }

    fn resolve(&self, id: Option<String>, result: Result<Params>) {
        let Some(id) = id else {
            warn!("rpc peer: response without id, dropping frame");
            return;
        };

        let Some(tx) = self.lock_pending().remove(&id) else {
            warn!(id, "rpc peer: response for unknown or expired call, dropping frame");
            return;
        };

        if tx.send(result).is_err() {
            debug!(id, "rpc peer: caller stopped waiting before response arrived");
        }
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    fn send_frame(&self, frame: &Request) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        (self.inner.sink)(text);
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
