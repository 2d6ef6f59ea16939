//! Streaming service: one transport plus one peer bound to one context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::rpc::{FrameSink, RpcPeer, DEFAULT_CALL_TIMEOUT};
use crate::stream::events::{
    AddMessage, ConnectToContext, EventsPush, PushEvent, TokenPush, ToolCallPush,
    ToolResponsePush, ADD_MESSAGE, CONNECT_TO_CONTEXT, ON_EVENTS, ON_TOKEN, ON_TOOL_CALL,
    ON_TOOL_RESPONSE,
};
use crate::transport::{Transport, WsTransport};
use crate::{AppError, Result};

/// Builds the transport for a streaming URL when the service connects.
pub type TransportFactory = Arc<dyn Fn(&str) -> Arc<dyn Transport> + Send + Sync>;

type Slot<T> = Mutex<Option<Arc<dyn Fn(&T) + Send + Sync>>>;

/// The four user callback slots. At most one callback per category.
#[derive(Default)]
struct Callbacks {
    token: Slot<TokenPush>,
    tool_call: Slot<ToolCallPush>,
    tool_response: Slot<ToolResponsePush>,
    events: Slot<EventsPush>,
}

impl Callbacks {
    fn deliver(&self, event: &PushEvent) {
        let delivered = match event {
            PushEvent::Token(push) => invoke(&self.token, push),
            PushEvent::ToolCall(push) => invoke(&self.tool_call, push),
            PushEvent::ToolResponse(push) => invoke(&self.tool_response, push),
            PushEvent::Events(push) => invoke(&self.events, push),
        };

        if !delivered {
            debug!(method = event.method(), "stream: no callback registered, push ignored");
        }
    }
}

fn invoke<T>(slot: &Slot<T>, payload: &T) -> bool {
    let callback = lock(slot).clone();
    match callback {
        Some(callback) => {
            callback(payload);
            true
        }
        None => false,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Session {
    transport: Arc<dyn Transport>,
    peer: RpcPeer,
    closed: CancellationToken,
}

/// Live token streaming session for a single conversational context.
///
/// Holds no network resources until [`StreamingService::connect`]. After a
/// successful connect the server pushes token and tool events, which are
/// forwarded to the callbacks registered with the `set_on_*` methods, while
/// [`StreamingService::add_message`] may be called at any time.
pub struct StreamingService {
    streaming_url: String,
    context_id: String,
    access_token: String,
    call_timeout: Duration,
    factory: TransportFactory,
    callbacks: Arc<Callbacks>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for StreamingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingService")
            .field("streaming_url", &self.streaming_url)
            .field("context_id", &self.context_id)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl StreamingService {
    /// Create a service that will connect over a [`WsTransport`].
    #[must_use]
    pub fn new(
        streaming_url: impl Into<String>,
        context_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self::with_transport_factory(streaming_url, context_id, access_token, |url| {
            Arc::new(WsTransport::new(url))
        })
    }

    /// Create a service from validated configuration and a loaded token.
    #[must_use]
    pub fn from_config(config: &StreamConfig, access_token: impl Into<String>) -> Self {
        let connect_timeout = config.timeouts.connect();
        Self::with_transport_factory(
            config.streaming_url.clone(),
            config.context_id.clone(),
            access_token,
            move |url| Arc::new(WsTransport::new(url).with_connect_timeout(connect_timeout)),
        )
        .with_call_timeout(config.timeouts.call())
    }

    /// Create a service whose transport is produced by `factory`.
    #[must_use]
    pub fn with_transport_factory<F>(
        streaming_url: impl Into<String>,
        context_id: impl Into<String>,
        access_token: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        Self {
            streaming_url: streaming_url.into(),
            context_id: context_id.into(),
            access_token: access_token.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            factory: Arc::new(factory),
            callbacks: Arc::new(Callbacks::default()),
            session: Mutex::new(None),
        }
    }

    /// Override the window `connect_to_context` waits for its response.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Context this service joins.
    #[must_use]
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Open the socket and join the context.
    ///
    /// The session is live only once the server has acknowledged
    /// `connect_to_context`. If that call fails the socket is closed before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Transport`] if the service already has a session or the
    ///   socket fails to open.
    /// - [`AppError::Timeout`] if the server does not acknowledge in time.
    /// - [`AppError::Remote`] if the server rejects the join (for example an
    ///   invalid or expired token).
    pub async fn connect(&self) -> Result<()> {
        let (transport, peer) = {
            let mut session = lock(&self.session);
            if session.is_some() {
                return Err(AppError::Transport("already connected".into()));
            }

            let transport = (self.factory)(&self.streaming_url);
            let peer = RpcPeer::with_timeout(sink_for(&transport), self.call_timeout);
            self.register_push_handlers(&peer);

            let dispatcher = peer.clone();
            transport.set_on_message(Arc::new(move |frame: String| {
                dispatcher.dispatch_message(&frame);
            }));

            let closer = peer.clone();
            let closed = CancellationToken::new();
            let close_signal = closed.clone();
            let context_id = self.context_id.clone();
            transport.set_on_close(Arc::new(move || {
                let cancelled = closer.cancel_pending();
                close_signal.cancel();
                info!(context_id, cancelled, "stream: transport closed");
            }));

            *session = Some(Session {
                transport: Arc::clone(&transport),
                peer: peer.clone(),
                closed,
            });
            (transport, peer)
        };

        if let Err(e) = transport.connect().await {
            warn!(context_id = %self.context_id, error = %e, "stream: transport failed to open");
            lock(&self.session).take();
            return Err(e);
        }

        let join = ConnectToContext {
            context_id: self.context_id.clone(),
            access_token: self.access_token.clone(),
        };

        match peer.request(CONNECT_TO_CONTEXT, &join).await {
            Ok(_) => {
                info!(context_id = %self.context_id, "stream: joined context");
                Ok(())
            }
            Err(e) => {
                warn!(context_id = %self.context_id, error = %e, "stream: join failed, closing");
                transport.close();
                lock(&self.session).take();
                Err(e)
            }
        }
    }

    /// Send a user message. Fire-and-forget: the outcome is only visible
    /// through the pushes it triggers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`]`("not connected")` before
    /// [`StreamingService::connect`] has been called.
    pub fn add_message(&self, message: &str) -> Result<()> {
        let peer = lock(&self.session)
            .as_ref()
            .map(|session| session.peer.clone())
            .ok_or_else(|| AppError::Transport("not connected".into()))?;

        peer.notify(
            ADD_MESSAGE,
            &AddMessage {
                message: message.to_owned(),
            },
        )
    }

    /// Close the socket. In-flight correlated calls fail once the socket has
    /// closed, or by their own timeout otherwise. Idempotent.
    pub fn close(&self) {
        let transport = lock(&self.session)
            .as_ref()
            .map(|session| Arc::clone(&session.transport));

        match transport {
            Some(transport) => {
                transport.close();
                debug!(context_id = %self.context_id, "stream: close requested");
            }
            None => debug!(context_id = %self.context_id, "stream: close without session"),
        }
    }

    /// Whether the underlying socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|session| session.transport.is_open())
    }

    /// Resolve once the socket of the current session has closed, whether
    /// the server or [`StreamingService::close`] ended it. Resolves at once
    /// when there is no session.
    pub async fn closed(&self) {
        let closed = lock(&self.session)
            .as_ref()
            .map(|session| session.closed.clone());

        if let Some(closed) = closed {
            closed.cancelled().await;
        }
    }

    /// Replace the callback for `on_token` pushes.
    pub fn set_on_token<F>(&self, callback: F)
    where
        F: Fn(&TokenPush) + Send + Sync + 'static,
    {
        *lock(&self.callbacks.token) = Some(Arc::new(callback));
    }

    /// Replace the callback for `on_tool_call` pushes.
    pub fn set_on_tool_call<F>(&self, callback: F)
    where
        F: Fn(&ToolCallPush) + Send + Sync + 'static,
    {
        *lock(&self.callbacks.tool_call) = Some(Arc::new(callback));
    }

    /// Replace the callback for `on_tool_response` pushes.
    pub fn set_on_tool_response<F>(&self, callback: F)
    where
        F: Fn(&ToolResponsePush) + Send + Sync + 'static,
    {
        *lock(&self.callbacks.tool_response) = Some(Arc::new(callback));
    }

    /// Replace the callback for `on_events` pushes.
    pub fn set_on_events<F>(&self, callback: F)
    where
        F: Fn(&EventsPush) + Send + Sync + 'static,
    {
        *lock(&self.callbacks.events) = Some(Arc::new(callback));
    }

    fn register_push_handlers(&self, peer: &RpcPeer) {
        forward(peer, &self.callbacks, ON_TOKEN, PushEvent::Token);
        forward(peer, &self.callbacks, ON_TOOL_CALL, PushEvent::ToolCall);
        forward(peer, &self.callbacks, ON_TOOL_RESPONSE, PushEvent::ToolResponse);
        forward(peer, &self.callbacks, ON_EVENTS, PushEvent::Events);
    }
}

/// Register `method` on `peer` so that its payload reaches the callbacks.
fn forward<P, W>(peer: &RpcPeer, callbacks: &Arc<Callbacks>, method: &'static str, wrap: W)
where
    P: DeserializeOwned + 'static,
    W: Fn(P) -> PushEvent + Send + Sync + 'static,
{
    let callbacks = Arc::clone(callbacks);
    peer.on_typed(method, move |payload: P| {
        callbacks.deliver(&wrap(payload));
        Ok(())
    });
}

/// Frame sink bound to `transport` without keeping it alive.
fn sink_for(transport: &Arc<dyn Transport>) -> FrameSink {
    let transport = Arc::downgrade(transport);
    Arc::new(move |frame: String| match transport.upgrade() {
        Some(transport) => transport.send(frame),
        None => warn!("stream: transport dropped, discarding outbound frame"),
    })
}
