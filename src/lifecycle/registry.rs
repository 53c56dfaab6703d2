//! Server-wide session ownership.
//!
//! # Responsibilities
//! - Create sessions for accepted connections and index them by id
//! - Take the global admission slot on accept, the per-user slot on activation
//! - Run the close path exactly once per session
//! - Drain every session on stop
//!
//! # Close Path
//! ```text
//! close_session(reason)
//!     → Session::begin_close (state flips first; only one caller proceeds)
//!     → if it was Active: drop subscriptions
//!     → release whichever admission slots the session still holds
//!     → remove from the session map
//!     → transport writer flushes the outbox and marks the session Closed
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::sync::watch;

use crate::auth::AuthIdentity;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, CloseReason, ProtocolError, ShutdownError};
use crate::observability::metrics;
use crate::pubsub::SubscriptionRegistry;
use crate::security::AdmissionController;
use crate::session::{Handshake, OutboxReceiver, Session, SessionId, SessionState};

/// Owner of every session on one server instance.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    subscriptions: SubscriptionRegistry,
    admission: AdmissionController,
    stopped: watch::Sender<bool>,
    auth_enabled: bool,
    handshake_timeout: Option<Duration>,
    outbox_capacity: usize,
}

impl SessionRegistry {
    /// Create a registry in the stopped state.
    pub fn new(config: &BrokerConfig) -> Self {
        let auth = config.auth();
        let admission = AdmissionController::new(
            config.max_connections,
            auth.and_then(|a| a.max_connections_per_user),
            auth.map(|a| a.index).unwrap_or(false),
        );
        let (stopped, _) = watch::channel(true);

        Self {
            sessions: DashMap::new(),
            subscriptions: SubscriptionRegistry::new(),
            admission,
            stopped,
            auth_enabled: auth.is_some(),
            handshake_timeout: auth.and_then(|a| a.handshake_timeout()),
            outbox_capacity: config.payload.outbox_capacity,
        }
    }

    /// Begin accepting sessions. Returns `false` if already started.
    pub fn start(&self) -> bool {
        let started = self.stopped.send_if_modified(|stopped| std::mem::replace(stopped, false));
        if started {
            tracing::info!("Session registry started");
        }
        started
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Receiver that changes whenever the registry starts or stops.
    pub fn watch_stopped(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }

    /// Register a new connection.
    ///
    /// The global slot is taken before the session exists, so a rejected
    /// connection never appears in the registry. With auth disabled the
    /// session is activated immediately; otherwise it waits for its `hello`,
    /// bounded by the handshake timeout.
    pub fn accept(self: &Arc<Self>, handshake: Handshake) -> Result<(Arc<Session>, OutboxReceiver), BrokerError> {
        if self.is_stopped() {
            return Err(ProtocolError::Stopped.into());
        }

        let (session, rx) = Session::new(handshake, self.outbox_capacity);
        self.admission.try_admit(session.id())?;
        session.mark_admitted();
        self.sessions.insert(session.id(), session.clone());
        metrics::record_session_opened();

        // stop() may have taken its snapshot before the insert.
        if self.is_stopped() {
            self.close_session(&session, CloseReason::ServerShutdown);
            return Err(ProtocolError::Stopped.into());
        }
        tracing::debug!(session_id = %session.id(), "Session accepted");

        if !self.auth_enabled {
            if let Err(e) = self.activate(&session, None) {
                let reason = match &e {
                    BrokerError::Admission(a) => CloseReason::Admission(a.clone()),
                    _ => CloseReason::Protocol(ProtocolError::NotActive),
                };
                self.close_session(&session, reason);
                return Err(e);
            }
        } else if let Some(timeout) = self.handshake_timeout {
            self.spawn_handshake_timeout(&session, timeout);
        }

        Ok((session, rx))
    }

    fn spawn_handshake_timeout(self: &Arc<Self>, session: &Arc<Session>, timeout: Duration) {
        let registry = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            tokio::select! {
                _ = session.settled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if session.state().is_pending() {
                        tracing::info!(session_id = %session.id(), timeout = ?timeout, "Handshake timed out");
                        registry.close_session(&session, CloseReason::Protocol(ProtocolError::HandshakeTimeout));
                    }
                }
            }
        });
    }

    /// Count `session` against its user and make it active.
    ///
    /// On failure nothing stays counted and the caller closes the session.
    pub fn activate(&self, session: &Session, identity: Option<AuthIdentity>) -> Result<(), BrokerError> {
        if self.is_stopped() {
            return Err(ProtocolError::Stopped.into());
        }

        let user = identity.as_ref().and_then(AuthIdentity::user_key);
        if let Some(user) = &user {
            if self.admission.try_admit_user(session.id(), user)? {
                session.set_admitted_user(user.clone());
            }
        }
        session.set_identity(identity);

        match session.transition(SessionState::Active) {
            Ok(_) => {
                tracing::info!(
                    session_id = %session.id(),
                    user = user.as_deref().unwrap_or("-"),
                    "Session active"
                );
                Ok(())
            }
            Err(state) => {
                if let Some(user) = session.take_admitted_user() {
                    self.admission.release_user(session.id(), &user);
                }
                tracing::debug!(session_id = %session.id(), state = %state, "Activation lost to close");
                Err(ProtocolError::NotActive.into())
            }
        }
    }

    /// Close `session`. Only the first call for a session has any effect.
    pub fn close_session(&self, session: &Session, reason: CloseReason) -> bool {
        let Some(prev) = session.begin_close(reason.clone()) else {
            return false;
        };

        if prev == SessionState::Active {
            let topics = self.subscriptions.remove_session(session);
            tracing::trace!(session_id = %session.id(), topics, "Subscriptions released");
        }
        if let Some(user) = session.take_admitted_user() {
            self.admission.release_user(session.id(), &user);
        }
        if session.take_admitted() {
            self.admission.release(session.id());
        }
        self.sessions.remove(&session.id());
        metrics::record_session_closed(reason.label());

        match &reason {
            CloseReason::Disconnected | CloseReason::Requested | CloseReason::ServerShutdown => {
                tracing::info!(session_id = %session.id(), reason = %reason, "Session closed")
            }
            _ => tracing::warn!(session_id = %session.id(), reason = %reason, "Session closed"),
        }
        true
    }

    /// Stop accepting, close every session and wait for each to finish.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        self.stopped.send_replace(true);
        let sessions = self.sessions();
        tracing::info!(sessions = sessions.len(), "Draining sessions");

        for session in &sessions {
            self.close_session(session, CloseReason::ServerShutdown);
        }
        let outcomes = join_all(sessions.iter().map(|session| async move {
            (session.id(), session.closed().await)
        }))
        .await;

        let failures: Vec<_> = outcomes
            .into_iter()
            .filter_map(|(id, outcome)| outcome.err().map(|e| (id, e)))
            .collect();

        if failures.is_empty() {
            tracing::info!("Session registry stopped");
            Ok(())
        } else {
            for (id, e) in &failures {
                tracing::warn!(session_id = %id, error = %e, "Session did not close cleanly");
            }
            Err(ShutdownError { failures })
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn active_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }
}

/// Drain an outbox without a socket, marking the session released on close.
#[cfg(test)]
pub(crate) fn spawn_null_transport(session: Arc<Session>, mut rx: OutboxReceiver) {
    tokio::spawn(async move {
        session.closing().await;
        while rx.try_recv().is_ok() {}
        session.mark_released(Ok(()));
    });
}
