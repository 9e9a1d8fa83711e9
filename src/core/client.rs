//! WebSocket echo client
//!
//! Consumes the same wire contract from the other side: sends
//! [`EchoRequest`]s, logs every reply as it arrives, and exposes the
//! handshake-completion gate so callers can block until the connection
//! is usable.

use crate::core::message::EchoRequest;
use crate::error::{EchoError, Result};
use crate::session::{HandshakeGate, SessionState};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection + handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// WebSocket echo client
pub struct EchoClient {
    config: ClientConfig,
    url: String,
    state: Arc<RwLock<SessionState>>,
    sink: Arc<Mutex<Option<WsSink>>>,
    gate: Arc<HandshakeGate>,
    reader_task: Option<JoinHandle<()>>,
}

impl EchoClient {
    /// Create a new client for a server URL (e.g. `ws://127.0.0.1:8080/echo`)
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(url, ClientConfig::default())
    }

    /// Create a new client with custom configuration
    #[must_use]
    pub fn with_config(url: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            config,
            url: url.into(),
            state: Arc::new(RwLock::new(SessionState::Connecting)),
            sink: Arc::new(Mutex::new(None)),
            gate: Arc::new(HandshakeGate::new()),
            reader_task: None,
        }
    }

    /// Connect and complete the WebSocket handshake
    ///
    /// Fires the handshake gate exactly once on success and spawns the
    /// reader task that logs every inbound reply. Handshake failure is
    /// fatal to this connection attempt and surfaced to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        {
            let state = self.state.read();
            if *state == SessionState::Open {
                return Err(EchoError::invalid_state("Client is already connected"));
            }
        }

        *self.state.write() = SessionState::HandshakeInProgress;

        let (ws_stream, _response) = timeout(self.config.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| EchoError::timeout("Connection timed out"))?
            .map_err(|e| EchoError::handshake(format!("Failed to connect to {}: {}", self.url, e)))?;

        *self.state.write() = SessionState::Open;
        self.gate.fire();
        tracing::info!("handshake complete with {}", self.url);

        let (sink, mut stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);

        let state = Arc::clone(&self.state);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(message) if message.is_text() => match message.to_text() {
                        Ok(text) => tracing::info!("<< {}", text),
                        Err(e) => tracing::warn!("unreadable reply: {}", e),
                    },
                    Ok(message) if message.is_close() => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("client transport error: {}", e);
                        break;
                    }
                }
            }
            *state.write() = SessionState::Closed;
        });
        self.reader_task = Some(reader_task);

        Ok(())
    }

    /// Block until the handshake has completed
    pub async fn await_handshake(&self) {
        self.gate.wait().await;
    }

    /// Send one echo request
    pub async fn send(&self, request: &EchoRequest) -> Result<()> {
        {
            let state = self.state.read();
            if *state != SessionState::Open {
                return Err(EchoError::invalid_state("Client is not connected"));
            }
        }

        let payload = serde_json::to_string(request)
            .map_err(|e| EchoError::serialization(format!("request encoding failed: {}", e)))?;

        let mut sink_guard = self.sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| EchoError::invalid_state("No active connection"))?;

        sink.send(Message::Text(payload))
            .await
            .map_err(|e| EchoError::connection(format!("Failed to send request: {}", e)))
    }

    /// Close the connection and wait for the close acknowledgment
    pub async fn close(&mut self) -> Result<()> {
        *self.state.write() = SessionState::Closing;

        if let Some(mut sink) = self.sink.lock().await.take() {
            // Best effort: peer may already be gone
            let _ = sink.send(Message::Close(None)).await;
        }

        // Reader ends once the close is acknowledged or the stream drops
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }

        *self.state.write() = SessionState::Closed;
        Ok(())
    }

    /// Check if client is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.read() == SessionState::Open
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Get the server URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// One parsed interactive command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Close the connection and exit
    Quit,
    /// Send an echo request
    Send(EchoRequest),
}

/// Parse one interactive line into a command
///
/// Grammar: `--msg <words...>`, `--times <int>`, `--delay <ms>`,
/// `--quit`; omitted fields default to an empty message, zero repeats
/// and zero delay (the server normalizes from there). A malformed line
/// yields an error; the caller reports it and keeps the session alive.
pub fn parse_command(line: &str) -> Result<ClientCommand> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(EchoError::decode("empty command"));
    }

    let mut words: Vec<&str> = Vec::new();
    let mut times: i32 = 0;
    let mut delay: i64 = 0;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "--quit" | "-q" => return Ok(ClientCommand::Quit),
            "--msg" | "-m" => {
                i += 1;
                while i < tokens.len() && !tokens[i].starts_with('-') {
                    words.push(tokens[i]);
                    i += 1;
                }
            }
            "--times" | "-t" => {
                let value = tokens
                    .get(i + 1)
                    .ok_or_else(|| EchoError::decode("--times requires a value"))?;
                times = value
                    .parse()
                    .map_err(|_| EchoError::decode(format!("invalid --times value: {}", value)))?;
                i += 2;
            }
            "--delay" | "-d" => {
                let value = tokens
                    .get(i + 1)
                    .ok_or_else(|| EchoError::decode("--delay requires a value"))?;
                delay = value
                    .parse()
                    .map_err(|_| EchoError::decode(format!("invalid --delay value: {}", value)))?;
                i += 2;
            }
            other => {
                return Err(EchoError::decode(format!("unrecognized token: {}", other)));
            }
        }
    }

    Ok(ClientCommand::Send(EchoRequest::new(
        words.join(" "),
        times,
        delay,
    )))
}
