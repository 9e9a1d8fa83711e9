//! Chatty Echo
//!
//! A WebSocket echo service built on tokio and tokio-tungstenite.
//!
//! ## Features
//!
//! - Server at `ws://<host>:<port>/echo` that repeats each message back
//!   `times` times, spaced `delay` milliseconds apart
//! - JSON wire contract: inbound `{"msg", "times", "delay"}`, outbound
//!   `{"msg"}`
//! - Timed delivery on a bounded worker pool shared across connections
//! - Per-connection serialized write path with race-tolerant
//!   cancellation on close
//! - Interactive command-line client speaking the same contract
//!
//! ## Example
//!
//! ```no_run
//! use chatty_echo::{EchoServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("127.0.0.1:8080");
//!     let mut server = EchoServer::with_config(config);
//!
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod error;
pub mod scheduler;
pub mod session;

// Re-export main types
pub use core::{
    parse_command, ClientCommand, ClientConfig, EchoClient, EchoReply, EchoRequest, EchoServer,
    ServerConfig,
};
pub use error::{EchoError, Result};
pub use scheduler::{EchoScheduler, SchedulerConfig};
pub use session::{ConnectionHandle, Delivery, HandshakeGate, ServerSession, SessionState};
