//! Per-connection session state.
//!
//! # Responsibilities
//! - Own the session id, identity, subscriptions and liveness timestamp
//! - Guard lifecycle transitions and make close idempotent
//! - Queue outbound frames in call order (FIFO per recipient)
//!
//! The socket itself belongs to the transport task; the session only holds
//! the sending half of its outbox.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::error::{close_code, CloseReason, TransportError};
use crate::lock;
use crate::protocol::ServerMessage;
use crate::session::state::SessionState;

/// Receiving half of a session outbox, drained by the transport writer.
pub type OutboxReceiver = mpsc::Receiver<Arc<str>>;

/// Maximum close-frame reason length allowed by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What the upgrade request contributed to the session.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Allowlisted upgrade headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Raw `Cookie` header, kept for cookie-mode authentication.
    pub cookie: Option<String>,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    close_reason: Option<CloseReason>,
    released: Option<Result<(), TransportError>>,
}

/// One logical connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<SessionState>,
    identity: RwLock<Option<AuthIdentity>>,
    admitted_user: Mutex<Option<String>>,
    topics: Mutex<HashSet<String>>,
    last_activity: Mutex<Instant>,
    outbox: mpsc::Sender<Arc<str>>,
    handshake: Handshake,
    greeted: AtomicBool,
    admitted: AtomicBool,
    connected_at: Instant,
}

impl Session {
    /// Create a session in `Connecting` together with its outbox receiver.
    pub fn new(handshake: Handshake, outbox_capacity: usize) -> (Arc<Self>, OutboxReceiver) {
        let (outbox, rx) = mpsc::channel(outbox_capacity.max(1));
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let now = Instant::now();
        let session = Arc::new(Self {
            id: SessionId::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Connecting,
                close_reason: None,
                released: None,
            }),
            state_tx,
            identity: RwLock::new(None),
            admitted_user: Mutex::new(None),
            topics: Mutex::new(HashSet::new()),
            last_activity: Mutex::new(now),
            outbox,
            handshake,
            greeted: AtomicBool::new(false),
            admitted: AtomicBool::new(false),
            connected_at: now,
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Identity established by the handshake, if any.
    pub fn identity(&self) -> Option<AuthIdentity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// User key derived from the identity's credentials.
    pub fn user(&self) -> Option<String> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(AuthIdentity::user_key)
    }

    /// Allowlisted upgrade headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.handshake.headers
    }

    pub(crate) fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Topics this session is subscribed to, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = lock(&self.topics).iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        lock(&self.topics).contains(topic)
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    /// Record inbound traffic of any kind.
    pub fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        lock(&self.lifecycle).close_reason.clone()
    }

    /// Encode and queue a frame for this session.
    pub fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        let frame = serde_json::to_string(message)
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.deliver(Arc::from(frame))
    }

    /// Queue an already encoded frame.
    ///
    /// Never blocks: a full outbox is reported as backpressure for this
    /// recipient only.
    pub fn deliver(&self, frame: Arc<str>) -> Result<(), TransportError> {
        if self.state().is_terminating() {
            return Err(TransportError::Closed);
        }
        self.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Resolves once the session starts closing.
    pub async fn closing(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| state.is_terminating()).await;
    }

    /// Resolves once the session is fully closed, with the transport outcome.
    pub async fn closed(&self) -> Result<(), TransportError> {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
        lock(&self.lifecycle).released.clone().unwrap_or(Ok(()))
    }

    /// Resolves once the session leaves the pending handshake states.
    pub(crate) async fn settled(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| !state.is_pending()).await;
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Move to `next`. Returns the previous state, or the current one when
    /// the transition is illegal.
    pub(crate) fn transition(&self, next: SessionState) -> Result<SessionState, SessionState> {
        let mut lifecycle = lock(&self.lifecycle);
        let prev = lifecycle.state;
        if !prev.can_transition_to(next) {
            return Err(prev);
        }
        lifecycle.state = next;
        self.state_tx.send_replace(next);
        Ok(prev)
    }

    /// Start closing. Returns the state the session was in, or `None` when a
    /// close already happened.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> Option<SessionState> {
        let mut lifecycle = lock(&self.lifecycle);
        let prev = lifecycle.state;
        let mut next = prev.close_target()?;
        if next == SessionState::Closing && lifecycle.released.is_some() {
            next = SessionState::Closed;
        }
        lifecycle.state = next;
        lifecycle.close_reason = Some(reason);
        self.state_tx.send_replace(next);
        Some(prev)
    }

    /// Called by the transport writer once the socket is gone.
    pub(crate) fn mark_released(&self, outcome: Result<(), TransportError>) {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.released.is_none() {
            lifecycle.released = Some(outcome);
        }
        if lifecycle.state == SessionState::Closing {
            lifecycle.state = SessionState::Closed;
            self.state_tx.send_replace(SessionState::Closed);
        }
    }

    /// Close code and reason for the final frame.
    pub(crate) fn close_frame(&self) -> (u16, String) {
        match self.close_reason() {
            Some(reason) => {
                let mut text = reason.to_string();
                if text.len() > MAX_CLOSE_REASON {
                    let mut end = MAX_CLOSE_REASON;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                }
                (reason.close_code(), text)
            }
            None => (close_code::NORMAL, String::new()),
        }
    }

    /// Record the client's `hello`. Returns `false` if one was already seen.
    pub(crate) fn mark_greeted(&self) -> bool {
        !self.greeted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn set_identity(&self, identity: Option<AuthIdentity>) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Record that this session holds a global admission slot.
    pub(crate) fn mark_admitted(&self) {
        self.admitted.store(true, Ordering::Release);
    }

    /// Hand back the global slot flag. `true` for exactly one caller.
    pub(crate) fn take_admitted(&self) -> bool {
        self.admitted.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_admitted_user(&self, user: String) {
        *lock(&self.admitted_user) = Some(user);
    }

    /// Hand back the user this session was counted against, at most once.
    pub(crate) fn take_admitted_user(&self) -> Option<String> {
        lock(&self.admitted_user).take()
    }

    /// Subscription set. Callers check `is_active` while holding this guard.
    pub(crate) fn topic_set(&self) -> MutexGuard<'_, HashSet<String>> {
        lock(&self.topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use std::time::Duration;

    fn make_session() -> (Arc<Session>, OutboxReceiver) {
        Session::new(Handshake::default(), 4)
    }

    #[test]
    fn session_ids_are_unique_and_parse() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().parse::<SessionId>().unwrap(), a);
    }

    #[test]
    fn starts_connecting() {
        let (session, _rx) = make_session();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_authenticated());
        assert!(session.user().is_none());
    }

    #[test]
    fn illegal_transition_reports_current_state() {
        let (session, _rx) = make_session();
        assert_eq!(session.transition(SessionState::Closing), Err(SessionState::Connecting));
        assert_eq!(session.transition(SessionState::Active), Ok(SessionState::Connecting));
    }

    #[test]
    fn close_is_idempotent() {
        let (session, _rx) = make_session();
        session.transition(SessionState::Active).unwrap();

        assert_eq!(session.begin_close(CloseReason::Requested), Some(SessionState::Active));
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.begin_close(CloseReason::ServerShutdown), None);
        assert_eq!(session.close_reason(), Some(CloseReason::Requested));

        session.mark_released(Ok(()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn pending_session_closes_directly() {
        let (session, _rx) = make_session();
        session.transition(SessionState::Authenticating).unwrap();
        let reason = CloseReason::Protocol(ProtocolError::HandshakeTimeout);
        assert_eq!(session.begin_close(reason), Some(SessionState::Authenticating));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn released_transport_skips_closing() {
        let (session, _rx) = make_session();
        session.transition(SessionState::Active).unwrap();
        session.mark_released(Err(TransportError::Closed));
        assert_eq!(session.state(), SessionState::Active);

        session.begin_close(CloseReason::Disconnected);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn deliveries_are_fifo() {
        let (session, mut rx) = make_session();
        session.send(&ServerMessage::Ping).unwrap();
        session.deliver(Arc::from("second")).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(&*rx.recv().await.unwrap(), "second");
    }

    #[test]
    fn full_outbox_is_backpressure() {
        let (session, _rx) = Session::new(Handshake::default(), 1);
        session.deliver(Arc::from("a")).unwrap();
        assert_eq!(session.deliver(Arc::from("b")), Err(TransportError::Backpressure));
    }

    #[test]
    fn closing_session_refuses_frames() {
        let (session, _rx) = make_session();
        session.transition(SessionState::Active).unwrap();
        session.begin_close(CloseReason::Requested);
        assert_eq!(session.deliver(Arc::from("late")), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn closed_resolves_with_transport_outcome() {
        let (session, _rx) = make_session();
        session.transition(SessionState::Active).unwrap();
        session.begin_close(CloseReason::ServerShutdown);

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.closed().await })
        };
        session.mark_released(Err(TransportError::Send("reset".into())));
        assert_eq!(
            waiter.await.unwrap(),
            Err(TransportError::Send("reset".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn touch_moves_last_activity() {
        let (session, _rx) = make_session();
        let before = session.last_activity();
        tokio::time::advance(Duration::from_millis(250)).await;
        session.touch();
        assert_eq!(session.last_activity() - before, Duration::from_millis(250));
    }

    #[test]
    fn hello_is_accepted_once() {
        let (session, _rx) = make_session();
        assert!(session.mark_greeted());
        assert!(!session.mark_greeted());
    }

    #[test]
    fn admission_slots_are_handed_back_once() {
        let (session, _rx) = make_session();
        assert!(!session.take_admitted());
        session.mark_admitted();
        session.set_admitted_user("ann".into());
        session.set_identity(Some(AuthIdentity::new(serde_json::json!({ "user": "ann" }), serde_json::json!({}))));

        assert_eq!(session.user().as_deref(), Some("ann"));
        assert!(session.is_authenticated());
        assert!(session.take_admitted());
        assert!(!session.take_admitted());
        assert_eq!(session.take_admitted_user().as_deref(), Some("ann"));
        assert_eq!(session.take_admitted_user(), None);
    }

    #[test]
    fn close_reason_is_truncated_for_frame() {
        let (session, _rx) = make_session();
        let long = "x".repeat(300);
        session.begin_close(CloseReason::Protocol(ProtocolError::Malformed(long)));
        let (code, reason) = session.close_frame();
        assert_eq!(code, close_code::PROTOCOL);
        assert!(reason.len() <= MAX_CLOSE_REASON);
    }
}
