//! Connection session management
//!
//! A session owns the receive side of one open WebSocket connection and
//! the association with the shared echo scheduler. All outbound frames
//! for a connection funnel through a single writer task that owns the
//! sink, so concurrent scheduled sends never interleave partial frames.

use crate::core::message::EchoRequest;
use crate::error::{EchoError, Result};
use crate::scheduler::EchoScheduler;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Outbound frames buffered per connection before back-pressure kicks in
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Generate a cryptographically secure session ID
///
/// 128-bit random ID from the OS RNG; collisions are not a practical
/// concern.
fn generate_session_id() -> u128 {
    OsRng.gen()
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakeInProgress,
    Open,
    Closing,
    Closed,
}

/// Outcome of handing a frame to a connection's write path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame accepted by the writer task
    Accepted,
    /// Connection already closed; frame dropped without error
    ConnectionClosed,
}

/// Cloneable handle to one connection's write path
///
/// Scheduled sends hold a clone of this handle; the closed flag is the
/// cancellation point checked before every delivery. The check is
/// best-effort: a send racing a close may still reach the writer task,
/// which fails it safely.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u128,
    peer_addr: SocketAddr,
    open: Arc<AtomicBool>,
    outbound_tx: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    fn new(peer_addr: SocketAddr, outbound_tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: generate_session_id(),
            peer_addr,
            open: Arc::new(AtomicBool::new(true)),
            outbound_tx,
        }
    }

    /// Build a handle around a bare queue, for unit tests
    #[cfg(test)]
    pub(crate) fn for_tests(peer_addr: SocketAddr, outbound_tx: mpsc::Sender<Arc<str>>) -> Self {
        Self::new(peer_addr, outbound_tx)
    }

    /// Get session ID
    #[must_use]
    pub fn id(&self) -> u128 {
        self.id
    }

    /// Get peer address
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Check whether the connection is still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the connection closed; pending scheduled sends will be dropped
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Hand an encoded frame to the writer task
    ///
    /// Never returns an error for a closed connection; closed-connection
    /// delivery failures are expected, not exceptional.
    pub async fn deliver(&self, frame: Arc<str>) -> Delivery {
        if !self.is_open() {
            return Delivery::ConnectionClosed;
        }

        match self.outbound_tx.send(frame).await {
            Ok(()) => Delivery::Accepted,
            // Writer gone means the connection tore down under us
            Err(_) => Delivery::ConnectionClosed,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Writer task: drains the per-connection queue into the WebSocket sink
///
/// A closed or already-closed sink ends the task silently; any other
/// write fault is logged and only that frame is abandoned.
fn spawn_writer<S>(
    mut sink: S,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
    open: Arc<AtomicBool>,
    session_id: u128,
) -> JoinHandle<()>
where
    S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if !open.load(Ordering::Acquire) {
                break;
            }

            match sink.send(Message::Text(frame.to_string())).await {
                Ok(()) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                    open.store(false, Ordering::Release);
                    break;
                }
                Err(e) => {
                    tracing::warn!("session {}: dropped one send: {}", session_id, e);
                }
            }
        }
    })
}

/// One server-side connection session
pub struct ServerSession {
    handle: ConnectionHandle,
    state: Arc<RwLock<SessionState>>,
}

impl ServerSession {
    /// Accept the WebSocket handshake on `stream` and run the session to
    /// completion
    ///
    /// The receive loop stays on the caller's task: each text frame is
    /// decoded and handed to the scheduler; a malformed frame is logged
    /// and the connection stays open. Returns when the peer closes, the
    /// transport fails, or the handshake is rejected.
    ///
    /// The connection handle is registered in `registry` for the
    /// session's lifetime so the server can close live connections on
    /// shutdown.
    pub async fn serve(
        stream: TcpStream,
        peer_addr: SocketAddr,
        scheduler: Arc<EchoScheduler>,
        endpoint: &str,
        registry: Arc<RwLock<Vec<ConnectionHandle>>>,
    ) -> Result<()> {
        let state = Arc::new(RwLock::new(SessionState::Connecting));

        *state.write() = SessionState::HandshakeInProgress;
        let expected = endpoint.to_string();
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, response: Response| {
                if request.uri().path() == expected {
                    Ok(response)
                } else {
                    let mut rejection = ErrorResponse::new(Some("no such endpoint".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            },
        )
        .await
        .map_err(|e| EchoError::handshake(format!("accept failed for {}: {}", peer_addr, e)))?;
        *state.write() = SessionState::Open;

        let (sink, stream) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let handle = ConnectionHandle::new(peer_addr, outbound_tx);
        let writer = spawn_writer(
            sink,
            outbound_rx,
            Arc::clone(&handle.open),
            handle.id(),
        );

        let session = Self {
            handle,
            state: Arc::clone(&state),
        };
        registry.write().push(session.handle.clone());
        tracing::info!(
            "session {} connected from {}",
            session.handle.id(),
            peer_addr
        );

        session.receive_loop(stream, scheduler).await;

        *state.write() = SessionState::Closing;
        session.handle.close();
        registry.write().retain(|h| h.id() != session.handle.id());
        // Pending scheduled sends still hold queue senders; abort the
        // writer so they see a closed channel and drop silently
        writer.abort();
        *state.write() = SessionState::Closed;

        tracing::info!("session disconnected from {}", peer_addr);
        Ok(())
    }

    /// Get the connection handle
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Get session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    async fn receive_loop(
        &self,
        mut stream: futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        scheduler: Arc<EchoScheduler>,
    ) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(message) if message.is_text() => {
                    let payload = match message.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("session {}: {}", self.handle.id(), e);
                            continue;
                        }
                    };

                    match EchoRequest::decode(payload) {
                        Ok(request) => {
                            if let Err(e) = scheduler.schedule(&request, &self.handle).await {
                                tracing::error!(
                                    "session {}: failed to schedule request: {}",
                                    self.handle.id(),
                                    e
                                );
                            }
                        }
                        // Malformed message does not terminate the session
                        Err(e) => tracing::error!("session {}: {}", self.handle.id(), e),
                    }
                }
                Ok(message) if message.is_close() => break,
                // Ping/pong is answered by tungstenite; binary frames are ignored
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("session {} transport error: {}", self.handle.id(), e);
                    break;
                }
            }
        }
    }
}

/// Single-fire handshake-completion gate
///
/// Await from any number of tasks; signal exactly once from another.
/// Signals before any waiter arrives are not lost.
pub struct HandshakeGate {
    fired: AtomicBool,
    notify: Notify,
}

impl HandshakeGate {
    /// Create a new unfired gate
    #[must_use]
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Signal handshake completion; later calls are no-ops
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Check whether the gate has fired
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the gate fires
    pub async fn wait(&self) {
        while !self.is_fired() {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register with the notifier before re-checking, so a fire
            // landing between the check and the await still wakes us
            notified.as_mut().enable();
            if self.is_fired() {
                break;
            }
            notified.await;
        }
    }
}

impl Default for HandshakeGate {
    fn default() -> Self {
        Self::new()
    }
}
