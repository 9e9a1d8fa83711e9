//! Error types for the echo service

use std::io;
use thiserror::Error;

/// Result type for echo service operations
pub type Result<T> = std::result::Result<T, EchoError>;

/// Echo service errors
#[derive(Debug, Error)]
pub enum EchoError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or incomplete inbound payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure to encode an outbound payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection error (transient write faults, unexpected disconnects)
    #[error("Connection error: {0}")]
    Connection(String),

    /// WebSocket handshake failure
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid state error
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Address parse error
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(String),
}

impl EchoError {
    /// Create a decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a handshake error
    pub fn handshake<S: Into<String>>(msg: S) -> Self {
        Self::Handshake(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create a channel error
    pub fn channel<S: Into<String>>(msg: S) -> Self {
        Self::Channel(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EchoError::decode("bad payload");
        assert_eq!(err.to_string(), "Decode error: bad payload");

        let err = EchoError::serialization("non-string key");
        assert_eq!(err.to_string(), "Serialization error: non-string key");

        let err = EchoError::connection("reset");
        assert_eq!(err.to_string(), "Connection error: reset");

        let err = EchoError::handshake("rejected");
        assert_eq!(err.to_string(), "Handshake error: rejected");
    }
}
