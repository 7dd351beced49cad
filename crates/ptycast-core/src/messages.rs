//! Channel message envelopes.
//!
//! Every frame on the streaming channel is a JSON object of the form
//! `{"type": ..., "payload": {...}}` with a closed set of types. Inbound and
//! outbound directions use separate enums so a connection can never echo a
//! server-only message back at the server.

use crate::error::CastResult;
use serde::{Deserialize, Serialize};

/// Messages a connected observer may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Raw keystrokes destined for the process input stream.
    Input { data: String },
    /// Terminal dimension change. Values are validated (not trusted) by the
    /// handler: both must be positive and fit a PTY dimension.
    Resize { cols: i64, rows: i64 },
    /// A logical key (arrows, function keys, ...) plus modifier names.
    SpecialKey {
        key: String,
        #[serde(default)]
        modifiers: Vec<String>,
    },
    /// Liveness probe; answered with `pong` on the same connection.
    Ping {},
}

/// Messages the server sends to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// One sanitized chunk of process output.
    Output { data: String },
    /// Session state notification.
    Status {
        status: SessionStatus,
        pid: Option<u32>,
        message: Option<String>,
    },
    Pong {},
    Error { code: String, message: String },
}

/// Coarse session state as reported on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl ClientMessage {
    /// Decode an inbound JSON text frame. Callers treat a decode failure as
    /// protocol noise and drop the frame silently.
    pub fn decode(text: &str) -> CastResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    /// Encode for the wire.
    pub fn encode(&self) -> CastResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
