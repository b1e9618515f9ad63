//! WebSocket RPC session with reconnect, call correlation and push dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tokio_retry::strategy::FixedInterval;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use steemwatch_core::error::TransportError;
use steemwatch_core::request::{CallRequest, Incoming};
use steemwatch_core::transport::{NotificationCallback, RpcClient, SubscriptionId};

use crate::notifications::{run_dispatcher, Dispatch, NotificationRegistry};

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hook run on every fresh connection, before the session reports `Connected`.
///
/// The connection is already open while the hook runs, so it may issue calls
/// (typically to re-establish notification subscriptions).
pub type OnConnect =
    Arc<dyn Fn(WsSession) -> BoxFuture<'static, Result<(), TransportError>> + Send + Sync>;

/// Lifecycle state of a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; calls fail with `ConnectionClosed`.
    Disconnected,
    /// Socket open, `on_connect` hook running.
    Handshaking,
    /// Socket open and hook finished.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Configuration for the WebSocket session.
#[derive(Debug, Clone)]
pub struct WsSessionConfig {
    /// Node endpoint, e.g. `ws://127.0.0.1:8090`.
    pub url: String,
    /// Fixed delay between reconnect attempts.
    pub retry_interval: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl Default for WsSessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8090".into(),
            retry_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(60),
        }
    }
}

impl WsSessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

struct Inner {
    config: WsSessionConfig,
    on_connect: Option<OnConnect>,
    next_id: AtomicU64,
    pending: PendingMap,
    notifications: NotificationRegistry,
    /// Writer half of the live connection, `None` while disconnected.
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    state: watch::Sender<ConnectionState>,
    /// Bumped on every successful connect so a stale `on_connect` cannot
    /// promote a newer connection.
    generation: AtomicU64,
    shutdown: CancellationToken,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<Dispatch>>>,
    started: AtomicBool,
}

/// WebSocket RPC session for one node endpoint.
///
/// Cloning is cheap; all clones share one connection. [`start`](Self::start)
/// spawns the background task that owns the socket and runs the
/// connect/reconnect loop until [`stop`](Self::stop) is called.
#[derive(Clone)]
pub struct WsSession {
    inner: Arc<Inner>,
}

impl WsSession {
    pub fn new(config: WsSessionConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a session whose connections run `hook` before reporting `Connected`.
    pub fn with_on_connect<F, Fut>(config: WsSessionConfig, hook: F) -> Self
    where
        F: Fn(WsSession) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let hook: OnConnect = Arc::new(move |session| hook(session).boxed());
        Self::build(config, Some(hook))
    }

    fn build(config: WsSessionConfig, on_connect: Option<OnConnect>) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                on_connect,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(HashMap::new()),
                notifications: NotificationRegistry::new(),
                outbound: Mutex::new(None),
                state,
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                dispatch_tx,
                dispatch_rx: Mutex::new(Some(dispatch_rx)),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the connect/reconnect loop and the notification dispatcher.
    ///
    /// Returns immediately. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(url = %self.inner.config.url, "session already started");
            return;
        }
        if let Some(rx) = self.inner.dispatch_rx.lock().unwrap().take() {
            tokio::spawn(run_dispatcher(rx));
        }
        tokio::spawn(self.clone().run());
    }

    /// Stop the session: outstanding calls fail with `ConnectionClosed`,
    /// later calls with `Shutdown`.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Token cancelled by [`stop`](Self::stop).
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Suspend until the session is `Connected`.
    pub async fn wait_until_connected(&self) -> Result<(), TransportError> {
        let mut rx = self.inner.state.subscribe();
        tokio::select! {
            res = rx.wait_for(|s| *s == ConnectionState::Connected) => match res {
                Ok(_) => Ok(()),
                Err(_) => Err(TransportError::Shutdown),
            },
            _ = self.inner.shutdown.cancelled() => Err(TransportError::Shutdown),
        }
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    /// Send `api.method(args)` and wait for the matching response.
    pub async fn call(
        &self,
        api: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Shutdown);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let text = CallRequest::new(id, api, method, &args).to_text()?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let sent = self
            .inner
            .outbound
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|out| out.send(text).is_ok());
        if !sent {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(TransportError::ConnectionClosed);
        }
        tracing::trace!(id, api, method, "call sent");

        rx.await.unwrap_or(Err(TransportError::ConnectionClosed))
    }

    async fn run(self) {
        let url = self.inner.config.url.clone();
        let retry_interval = self.inner.config.retry_interval;
        let mut delays = FixedInterval::new(retry_interval);
        let mut first_attempt = true;

        loop {
            self.enter_disconnected();
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            if !first_attempt {
                let delay = delays.next().unwrap_or(retry_interval);
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = self.inner.shutdown.cancelled() => break,
                }
            }
            first_attempt = false;

            let ws = match self.connect().await {
                Ok(ws) => ws,
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        "couldn't connect, trying again in {retry_interval:?}"
                    );
                    continue;
                }
            };
            self.serve(ws).await;
        }

        self.enter_disconnected();
        tracing::info!(url = %url, "session stopped");
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        let config = &self.inner.config;
        tracing::info!(url = %config.url, "connecting via WebSocket");

        let attempt = time::timeout(
            config.connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        );
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => Err(TransportError::Shutdown),
            res = attempt => match res {
                Err(_) => Err(TransportError::ConnectionFailure(format!(
                    "timed out after {:?}",
                    config.connect_timeout
                ))),
                Ok(Err(e)) => Err(TransportError::ConnectionFailure(e.to_string())),
                Ok(Ok((ws, _))) => Ok(ws),
            },
        }
    }

    /// Drive one open connection until it closes, fails, or the session stops.
    async fn serve(&self, ws: WsStream) {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.inner.outbound.lock().unwrap() = Some(out_tx);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Handshaking);
        tokio::spawn(self.clone().launch_on_connect(generation));

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(text) = out_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "WS send error");
                        break;
                    }
                }
                msg = stream.next() => {
                    match msg {
                        None => {
                            tracing::warn!(url = %self.inner.config.url, "connection closed");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WS receive error");
                            break;
                        }
                        Some(Ok(Message::Text(text))) => self.handle_message(text.as_str()),
                        Some(Ok(Message::Close(_))) => {
                            tracing::warn!(url = %self.inner.config.url, "server closed connection");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn launch_on_connect(self, generation: u64) {
        if let Some(hook) = self.inner.on_connect.clone() {
            if let Err(e) = hook(self.clone()).await {
                tracing::warn!(error = %e, "on_connect hook failed");
            }
        }
        let promoted = self.inner.state.send_if_modified(|state| {
            let current = self.inner.generation.load(Ordering::SeqCst);
            if *state == ConnectionState::Handshaking && current == generation {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if promoted {
            tracing::info!(url = %self.inner.config.url, "connected");
        }
    }

    fn handle_message(&self, text: &str) {
        match Incoming::parse(text) {
            Ok(Incoming::Result { id, result }) => self.complete(id, Ok(result)),
            Ok(Incoming::Error { id, error }) => self.complete(id, Err(TransportError::Rpc(error))),
            Ok(Incoming::Notice {
                subscription,
                params,
            }) => {
                let known =
                    self.inner
                        .notifications
                        .dispatch(subscription, params, &self.inner.dispatch_tx);
                if !known {
                    tracing::warn!(%subscription, "notice for unknown subscription");
                }
            }
            Ok(Incoming::Unrecognized(msg)) => {
                tracing::warn!(message = %msg, "unable to parse message from server");
            }
            Err(e) => {
                tracing::warn!(error = %e, "unable to parse message from server");
            }
        }
    }

    fn complete(&self, id: u64, result: Result<Value, TransportError>) {
        match self.inner.pending.lock().unwrap().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!(id, "response for unknown call id"),
        }
    }

    /// Enter `Disconnected`: drop the writer, clear subscriptions, and fail
    /// every outstanding call.
    fn enter_disconnected(&self) {
        *self.inner.outbound.lock().unwrap() = None;
        self.set_state(ConnectionState::Disconnected);
        self.inner.notifications.clear();

        let failed: Vec<_> = self.inner.pending.lock().unwrap().drain().collect();
        if !failed.is_empty() {
            tracing::warn!(count = failed.len(), "failing in-flight calls, connection closed");
        }
        for (_, tx) in failed {
            let _ = tx.send(Err(TransportError::ConnectionClosed));
        }
    }

    fn set_state(&self, new_state: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            *state = new_state;
            true
        });
        if changed {
            tracing::debug!(url = %self.inner.config.url, state = %new_state, "state change");
        }
    }
}

#[async_trait]
impl RpcClient for WsSession {
    async fn call(&self, api: &str, method: &str, args: Value) -> Result<Value, TransportError> {
        WsSession::call(self, api, method, args).await
    }

    fn register_notification(&self, callback: NotificationCallback) -> SubscriptionId {
        self.inner.notifications.register(callback)
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.inner.notifications.contains(id)
    }

    async fn subscription_lost(&self, id: SubscriptionId) {
        self.inner.notifications.removed(id).await
    }

    async fn wait_connected(&self) -> Result<(), TransportError> {
        self.wait_until_connected().await
    }

    fn url(&self) -> &str {
        &self.inner.config.url
    }
}
