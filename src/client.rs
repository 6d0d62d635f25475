use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt as _;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use url::Url;

use crate::Result;
use crate::dispatch::{ClientEvent, CommandRegistry};
use crate::error::Error;
use crate::message::Message;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 64;

/// Connection state tracking.
///
/// Owned by the [`Client`] itself and updated on every transition, so callers
/// never need to inspect the transport to learn the lifecycle phase.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress
    Disconnected,
    /// Handshake in flight
    Connecting,
    /// Connection open, frames flowing
    Connected,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// WebSocket client that owns one connection to a command server and
/// republishes its lifecycle and decoded messages to subscribers.
///
/// The wire format is one JSON object per text frame with a `cmd` string
/// field naming the command; see [`Message`]. Frames that do not decode are
/// dropped without an event, observable only via [`Client::dropped_frames`].
///
/// `Client` is cheaply cloneable; clones share the connection and all
/// subscription channels.
///
/// # Example
///
/// ```no_run
/// use cmdsocket::Client;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://example.com/server", "live")?;
///     let mut heartbeats = client.subscribe("heartbeat");
///     client.connect();
///
///     while let Ok(message) = heartbeats.recv().await {
///         println!("seq: {:?}", message.get("seq"));
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Connection target, fixed at construction
    server: Url,
    /// Sub-protocol token sent during the handshake, fixed at construction
    protocol: HeaderValue,
    /// Lifecycle state, mutated only while holding the `conn` lock
    state_tx: watch::Sender<ConnectionState>,
    /// Per-command subscription channels
    registry: CommandRegistry,
    /// Lifecycle event fan-out
    event_tx: broadcast::Sender<ClientEvent>,
    /// Active connection bookkeeping; every lifecycle transition happens
    /// under this lock
    conn: Mutex<ConnectionSlot>,
    /// Frames dropped because they were not valid command objects
    dropped_frames: AtomicU64,
}

/// Handle to the connection task of the current generation.
///
/// The generation ties each task to the connection it opened: a task whose
/// generation no longer matches the slot's has been superseded by a later
/// `connect` and must not touch state or emit events.
#[derive(Default)]
struct ConnectionSlot {
    generation: u64,
    shutdown: Option<watch::Sender<bool>>,
}

impl Client {
    /// Create a client for `server`, negotiating `protocol` on each connect.
    ///
    /// Validates the address and the sub-protocol token up front; everything
    /// network-related surfaces later through [`Client::events`].
    pub fn new(server: &str, protocol: &str) -> Result<Self> {
        let server = Url::parse(server)?;
        match server.scheme() {
            "ws" | "wss" => {}
            other => return Err(Error::UnsupportedScheme(other.to_owned())),
        }
        let protocol: HeaderValue = protocol.parse().map_err(Error::SubProtocol)?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(ClientInner {
                server,
                protocol,
                state_tx,
                registry: CommandRegistry::new(),
                event_tx,
                conn: Mutex::new(ConnectionSlot::default()),
                dropped_frames: AtomicU64::new(0),
            }),
        })
    }

    /// Open the connection to the configured server.
    ///
    /// Returns immediately; the handshake runs on a spawned task. Handshake
    /// failures surface as [`ClientEvent::Error`] with no `Closed` event,
    /// since the connection never reached the open state. A no-op while a
    /// connection is open or being established, so at most one connection
    /// exists per client at any time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut conn = self
            .inner
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *self.inner.state_tx.borrow() != ConnectionState::Disconnected {
            return;
        }
        conn.generation += 1;
        let generation = conn.generation;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        conn.shutdown = Some(shutdown_tx);
        self.inner
            .state_tx
            .send_replace(ConnectionState::Connecting);
        drop(conn);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_connection(inner, generation, shutdown_rx));
    }

    /// Close the active connection.
    ///
    /// Emits exactly one [`ClientEvent::Closed`] and signals the connection
    /// task to send a close frame and drop the socket. The state transition
    /// and the shutdown signal are one critical section, so a concurrent
    /// `connect` cannot slip in between and receive the signal instead. A
    /// no-op when no connection is open; the client can connect again
    /// afterwards.
    pub fn close(&self) {
        let mut conn = self
            .inner
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.inner.state_tx.borrow().is_connected() {
            return;
        }
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        if let Some(tx) = conn.shutdown.take() {
            _ = tx.send(true);
        }
        drop(conn);

        #[cfg(feature = "tracing")]
        tracing::debug!(server = %self.inner.server, "connection closed");
        _ = self.inner.event_tx.send(ClientEvent::Closed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to messages whose `cmd` field equals `cmd`.
    ///
    /// Each call returns an independent receiver. Receivers survive
    /// reconnects: they keep delivering messages from whatever connection is
    /// active.
    #[must_use]
    pub fn subscribe(&self, cmd: &str) -> broadcast::Receiver<Message> {
        self.inner.registry.subscribe(cmd)
    }

    /// Drop the subscription channel registered under `cmd`.
    ///
    /// Outstanding receivers for `cmd` observe a closed channel. Simply
    /// dropping all receivers has the same effect eventually.
    pub fn unsubscribe(&self, cmd: &str) {
        self.inner.registry.unsubscribe(cmd);
    }

    /// Subscribe to every decoded message regardless of command.
    ///
    /// This is the fallback for commands with no named subscription.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<Message> {
        self.inner.registry.subscribe_all()
    }

    /// Subscribe to lifecycle events ([`ClientEvent::Error`] and
    /// [`ClientEvent::Closed`]).
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Count of inbound frames dropped because they were not a JSON object
    /// with a string `cmd` field.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }
}

/// Tear down the connection owned by `generation` if it is still the live
/// one, emitting the error (when present) followed by `Closed`.
///
/// A task that was superseded by a later `connect`, or whose connection was
/// already closed locally, leaves state alone and emits nothing.
fn finish_connection(inner: &ClientInner, generation: u64, error: Option<tungstenite::Error>) {
    let mut conn = inner.conn.lock().unwrap_or_else(PoisonError::into_inner);
    if conn.generation != generation || !inner.state_tx.borrow().is_connected() {
        return;
    }
    inner.state_tx.send_replace(ConnectionState::Disconnected);
    conn.shutdown = None;
    drop(conn);

    if let Some(e) = error {
        #[cfg(feature = "tracing")]
        tracing::warn!(server = %inner.server, error = %e, "transport error");
        _ = inner
            .event_tx
            .send(ClientEvent::Error(Arc::new(Error::Connection(e))));
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(server = %inner.server, "connection closed");
    _ = inner.event_tx.send(ClientEvent::Closed);
}

/// Record a failed connection attempt: emit the error and return to
/// `Disconnected` without a `Closed` event.
fn fail_handshake(inner: &ClientInner, generation: u64, error: tungstenite::Error) {
    let mut conn = inner.conn.lock().unwrap_or_else(PoisonError::into_inner);
    if conn.generation != generation {
        return;
    }
    conn.shutdown = None;
    inner.state_tx.send_replace(ConnectionState::Disconnected);
    drop(conn);

    #[cfg(feature = "tracing")]
    tracing::warn!(server = %inner.server, error = %error, "connection attempt failed");
    _ = inner
        .event_tx
        .send(ClientEvent::Error(Arc::new(Error::Connection(error))));
}

/// One connection's lifetime: handshake, read loop, teardown.
async fn run_connection(
    inner: Arc<ClientInner>,
    generation: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let request = inner.server.as_str().into_client_request().map(|mut req| {
        req.headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, inner.protocol.clone());
        req
    });

    let mut ws = match request {
        Ok(req) => match connect_async(req).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                fail_handshake(&inner, generation, e);
                return;
            }
        },
        Err(e) => {
            fail_handshake(&inner, generation, e);
            return;
        }
    };

    {
        let conn = inner.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if conn.generation != generation {
            return;
        }
        inner.state_tx.send_replace(ConnectionState::Connected);
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(server = %inner.server, "connected");

    loop {
        tokio::select! {
            // Shutdown wins over a ready frame so nothing is dispatched after
            // close() returns.
            biased;

            changed = shutdown_rx.changed() => {
                let graceful = changed.is_ok() && *shutdown_rx.borrow_and_update();
                if graceful {
                    // Graceful close first; dropping the stream below is the
                    // forced termination.
                    _ = ws.close(None).await;
                }
                return;
            }

            frame = ws.next() => match frame {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    match serde_json::from_str::<Message>(text.as_str()) {
                        Ok(message) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(cmd = %message.cmd, "dispatching message");
                            inner.registry.dispatch(message);
                        }
                        Err(e) => {
                            // Malformed frames, and objects without a string
                            // `cmd`, are dropped without an event. The counter
                            // keeps the loss observable.
                            inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                            #[cfg(feature = "tracing")]
                            tracing::debug!(error = %e, "dropping undecodable frame");
                            #[cfg(not(feature = "tracing"))]
                            let _: serde_json::Error = e;
                        }
                    }
                }
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    finish_connection(&inner, generation, None);
                    return;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no commands.
                }
                Some(Err(e)) => {
                    // Any transport error is fatal to this connection: report
                    // it, then tear down. Callers wanting reconnection watch
                    // for Error/Closed and call connect() again.
                    finish_connection(&inner, generation, Some(e));
                    return;
                }
            },
        }
    }
}
