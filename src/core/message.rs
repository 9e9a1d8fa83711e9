//! Wire message types and JSON codec
//!
//! The wire schema is a single JSON object per text frame. Inbound:
//! `{"msg": "<text>", "times": <int>, "delay": <int ms>}`; all three
//! fields must be present, though `times <= 0` and `delay < 0` are
//! normalized rather than rejected. Outbound: `{"msg": "<text>"}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{EchoError, Result};

/// Inbound echo request
///
/// Immutable once decoded; consumed exactly once by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoRequest {
    /// Text to be echoed back (may be empty)
    pub msg: String,
    /// Number of times the echo is sent back; `<= 0` means once
    pub times: i32,
    /// Delay in milliseconds between echoes; negative means no delay
    pub delay: i64,
}

impl EchoRequest {
    /// Create a new request
    #[must_use]
    pub fn new(msg: impl Into<String>, times: i32, delay: i64) -> Self {
        Self {
            msg: msg.into(),
            times,
            delay,
        }
    }

    /// Decode a request from a raw text payload
    ///
    /// Fails with [`EchoError::Decode`] when the payload is not valid JSON
    /// or any of `msg`/`times`/`delay` is missing.
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| EchoError::decode(format!("invalid echo request: {}", e)))
    }

    /// Repeat count with absent/zero/negative coerced to a single send
    #[must_use]
    pub fn normalized_times(&self) -> u32 {
        self.times.max(1) as u32
    }

    /// Inter-send delay with negative values coerced to zero
    #[must_use]
    pub fn normalized_delay(&self) -> Duration {
        Duration::from_millis(self.delay.max(0) as u64)
    }
}

impl fmt::Display for EchoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EchoRequest{{msg={:?}, times={}, delay={}}}",
            self.msg, self.times, self.delay
        )
    }
}

/// Outbound echo reply
///
/// One reply is built per inbound request; all repeated sends reuse the
/// same payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoReply {
    /// Echoed text
    pub msg: String,
}

impl EchoReply {
    /// Build the reply for a request
    #[must_use]
    pub fn for_request(request: &EchoRequest) -> Self {
        Self {
            msg: request.msg.clone(),
        }
    }

    /// Encode the reply into a wire payload
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| EchoError::serialization(format!("reply encoding failed: {}", e)))
    }
}

impl fmt::Display for EchoReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EchoReply{{msg={:?}}}", self.msg)
    }
}
