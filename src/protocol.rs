//! Wire protocol: JSON text frames exchanged over the socket.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;

/// Credentials carried by a `hello` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HelloAuth {
    /// Sealed token from the auth endpoint (token mode).
    Token(String),
    /// Request headers to check directly (direct mode).
    Headers(HashMap<String, String>),
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        id: Option<Value>,
        #[serde(default)]
        auth: Option<HelloAuth>,
        #[serde(default)]
        subs: Vec<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Ping {
        #[serde(default)]
        id: Option<Value>,
    },
    Sub {
        #[serde(default)]
        id: Option<Value>,
        path: String,
    },
    Unsub {
        #[serde(default)]
        id: Option<Value>,
        path: String,
    },
    Request {
        #[serde(default)]
        id: Option<Value>,
        #[serde(default = "default_method")]
        method: String,
        path: String,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Message {
        #[serde(default)]
        id: Option<Value>,
        message: Value,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Sub { .. } => "sub",
            ClientMessage::Unsub { .. } => "unsub",
            ClientMessage::Request { .. } => "request",
            ClientMessage::Message { .. } => "message",
        }
    }

    pub fn id(&self) -> Option<&Value> {
        match self {
            ClientMessage::Hello { id, .. }
            | ClientMessage::Ping { id }
            | ClientMessage::Sub { id, .. }
            | ClientMessage::Unsub { id, .. }
            | ClientMessage::Request { id, .. }
            | ClientMessage::Message { id, .. } => id.as_ref(),
        }
    }
}

/// Heartbeat timings advertised in the `hello` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub interval: u64,
    pub timeout: u64,
}

/// Frames sent by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Hello {
        id: Option<Value>,
        socket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat: Option<HeartbeatInfo>,
    },
    Ping,
    Pub {
        path: String,
        message: Value,
    },
    Update {
        message: Value,
    },
    Sub {
        id: Option<Value>,
        path: String,
    },
    Unsub {
        id: Option<Value>,
        path: String,
    },
    Request {
        id: Option<Value>,
        #[serde(rename = "statusCode")]
        status_code: u16,
        payload: Value,
    },
    Message {
        id: Option<Value>,
        message: Value,
    },
    Error {
        id: Option<Value>,
        #[serde(rename = "statusCode")]
        status_code: u16,
        code: String,
        error: String,
    },
}

impl ServerMessage {
    /// Error reply for a failed client frame.
    pub fn error(id: Option<Value>, err: &BrokerError) -> Self {
        ServerMessage::Error {
            id,
            status_code: err.status_code(),
            code: err.code().to_string(),
            error: err.to_string(),
        }
    }
}

/// Prefix marking a chunk with more to follow.
pub const CHUNK_MORE: char = '+';
/// Prefix marking the final chunk.
pub const CHUNK_LAST: char = '!';

/// Split an encoded frame into chunk frames of at most `max_chars` payload chars.
///
/// Frames within the limit are returned untouched.
pub fn chunk_frame(frame: &str, max_chars: Option<usize>) -> Vec<String> {
    let max = match max_chars {
        Some(max) if max > 0 && frame.chars().count() > max => max,
        _ => return vec![frame.to_string()],
    };

    let chars: Vec<char> = frame.chars().collect();
    let pieces: Vec<&[char]> = chars.chunks(max).collect();
    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut out = String::with_capacity(piece.len() + 1);
            out.push(if i == last { CHUNK_LAST } else { CHUNK_MORE });
            out.extend(piece);
            out
        })
        .collect()
}
