//! Error taxonomy for the broker.
//!
//! # Propagation
//! - `ConfigError` is raised once at startup and prevents serving
//! - `AuthError`, `AdmissionError`, `ProtocolError` end only the offending session
//! - `TransportError` is isolated to one recipient and never reaches the publisher
//! - `ShutdownError` is surfaced after the drain has otherwise completed

use thiserror::Error;

use crate::session::SessionId;

pub use crate::config::loader::ConfigError;

/// WebSocket close codes used when a session is torn down.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL: u16 = 1002;
    pub const POLICY: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
}

/// Authentication failures. Non-fatal to the server.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential check failed: {0}")]
    Check(String),

    #[error("failed to seal credentials: {0}")]
    Seal(String),

    #[error("failed to unseal credentials: {0}")]
    Unseal(String),
}

/// Connection caps exceeded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("server connection limit reached ({limit})")]
    GlobalLimit { limit: usize },

    #[error("connection limit reached for user {user} ({limit})")]
    UserLimit { user: String, limit: usize },
}

/// Protocol violations by a single session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    #[error("connection is not initialized")]
    NotInitialized,

    #[error("connection already initialized")]
    AlreadyInitialized,

    #[error("session is not active")]
    NotActive,

    #[error("subscription not found: {0}")]
    TopicNotPermitted(String),

    #[error("invalid topic path: {0}")]
    InvalidTopic(String),

    #[error("server is stopped")]
    Stopped,

    #[error("no handler for {0} messages")]
    Unhandled(&'static str),
}

/// Delivery failures to one recipient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("session outbox is full")]
    Backpressure,

    #[error("transport closed")]
    Closed,

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Sessions whose close path reported an error during drain.
#[derive(Debug, Error)]
#[error("{} session(s) failed to close cleanly", failures.len())]
pub struct ShutdownError {
    pub failures: Vec<(SessionId, TransportError)>,
}

/// Umbrella error for host-facing operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Stable machine-readable code for wire `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::Config(_) => "CONFIG",
            BrokerError::Auth(_) => "UNAUTHORIZED",
            BrokerError::Admission(_) => "TOO_MANY_CONNECTIONS",
            BrokerError::Protocol(ProtocolError::TopicNotPermitted(_)) => "NOT_FOUND",
            BrokerError::Protocol(ProtocolError::Unhandled(_)) => "NOT_FOUND",
            BrokerError::Protocol(_) => "BAD_REQUEST",
            BrokerError::Transport(_) => "TRANSPORT",
            BrokerError::Shutdown(_) | BrokerError::Io(_) => "INTERNAL",
        }
    }

    /// HTTP-like status reported alongside the code.
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::Auth(_) => 401,
            BrokerError::Admission(_) => 503,
            BrokerError::Protocol(ProtocolError::TopicNotPermitted(_)) => 404,
            BrokerError::Protocol(ProtocolError::Unhandled(_)) => 404,
            BrokerError::Protocol(ProtocolError::Stopped) => 503,
            BrokerError::Protocol(_) => 400,
            _ => 500,
        }
    }
}

/// Why a session left its working states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the socket or the stream ended.
    Disconnected,
    /// Host or client asked for the close.
    Requested,
    /// Server stop drained the session.
    ServerShutdown,
    Auth(AuthError),
    Admission(AdmissionError),
    Protocol(ProtocolError),
    Transport(TransportError),
}

impl CloseReason {
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::Disconnected | CloseReason::Requested => close_code::NORMAL,
            CloseReason::ServerShutdown => close_code::GOING_AWAY,
            CloseReason::Auth(_) | CloseReason::Admission(_) => close_code::POLICY,
            CloseReason::Protocol(_) => close_code::PROTOCOL,
            CloseReason::Transport(_) => close_code::INTERNAL,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Requested => "requested",
            CloseReason::ServerShutdown => "shutdown",
            CloseReason::Auth(_) => "auth",
            CloseReason::Admission(_) => "admission",
            CloseReason::Protocol(ProtocolError::HeartbeatTimeout) => "heartbeat",
            CloseReason::Protocol(ProtocolError::HandshakeTimeout) => "handshake_timeout",
            CloseReason::Protocol(_) => "protocol",
            CloseReason::Transport(_) => "transport",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Disconnected => write!(f, "disconnected"),
            CloseReason::Requested => write!(f, "close requested"),
            CloseReason::ServerShutdown => write!(f, "server shutting down"),
            CloseReason::Auth(e) => write!(f, "{}", e),
            CloseReason::Admission(e) => write!(f, "{}", e),
            CloseReason::Protocol(e) => write!(f, "{}", e),
            CloseReason::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl From<BrokerError> for CloseReason {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Auth(e) => CloseReason::Auth(e),
            BrokerError::Admission(e) => CloseReason::Admission(e),
            BrokerError::Protocol(e) => CloseReason::Protocol(e),
            BrokerError::Transport(e) => CloseReason::Transport(e),
            _ => CloseReason::Requested,
        }
    }
}
