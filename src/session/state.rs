//! Session lifecycle states.
//!
//! # State Transitions
//! ```text
//! Connecting → Authenticating: hello received, auth configured
//! Connecting → Active:         auth disabled
//! Authenticating → Active:     credentials valid and admitted
//! Connecting|Authenticating → Closed: rejected, timed out, shut down
//! Active → Closing:            disconnect, close request, shutdown, heartbeat
//! Closing → Closed:            outbox flushed and transport released
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Connecting, Active)
                | (Connecting, Closed)
                | (Authenticating, Active)
                | (Authenticating, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    /// Closing or closed.
    pub fn is_terminating(self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }

    /// Not yet active and not terminating.
    pub fn is_pending(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Authenticating)
    }

    /// State a close request moves to from `self`, if any.
    pub fn close_target(self) -> Option<SessionState> {
        match self {
            SessionState::Connecting | SessionState::Authenticating => Some(SessionState::Closed),
            SessionState::Active => Some(SessionState::Closing),
            SessionState::Closing | SessionState::Closed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
