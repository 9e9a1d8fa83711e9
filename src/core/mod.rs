//! Core echo service components

pub mod client;
pub mod message;
pub mod server;

pub use client::{parse_command, ClientCommand, ClientConfig, EchoClient};
pub use message::{EchoReply, EchoRequest};
pub use server::{EchoServer, ServerConfig};
