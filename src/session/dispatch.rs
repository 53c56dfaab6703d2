//! Inbound frame handling.
//!
//! # Responsibilities
//! - Decode client frames and route them by type
//! - Drive the `hello` handshake: authenticate, admit, activate
//! - Answer `sub`, `unsub`, `request` and `message` frames
//!
//! Frames other than `hello` are refused until the session is active.
//! Replies go through the session outbox like every other delivery.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::auth::AuthNegotiator;
use crate::error::{BrokerError, CloseReason, ProtocolError};
use crate::lifecycle::SessionRegistry;
use crate::protocol::{ClientMessage, HeartbeatInfo, HelloAuth, ServerMessage};
use crate::session::handle::Session;
use crate::session::hooks::{MessageHandler, RequestContext, RequestHandler};

/// What the transport should do after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Close(CloseReason),
}

/// Routes decoded frames for every session of one broker.
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    negotiator: Option<Arc<AuthNegotiator>>,
    requests: Option<Arc<dyn RequestHandler>>,
    messages: Option<Arc<dyn MessageHandler>>,
    heartbeat: Option<HeartbeatInfo>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        negotiator: Option<Arc<AuthNegotiator>>,
        requests: Option<Arc<dyn RequestHandler>>,
        messages: Option<Arc<dyn MessageHandler>>,
        heartbeat: Option<HeartbeatInfo>,
    ) -> Self {
        Self {
            registry,
            negotiator,
            requests,
            messages,
            heartbeat,
        }
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, session: &Arc<Session>, text: &str) -> Flow {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                let err = ProtocolError::Malformed(e.to_string());
                tracing::debug!(session_id = %session.id(), error = %err, "Malformed frame");
                reply(session, ServerMessage::error(None, &err.clone().into()));
                return Flow::Close(CloseReason::Protocol(err));
            }
        };

        tracing::trace!(session_id = %session.id(), kind = message.kind(), "Frame received");

        if let ClientMessage::Hello { id, auth, subs, .. } = message {
            return self.hello(session, id, auth, subs).await;
        }
        // Liveness only; the reader already touched the session.
        if let ClientMessage::Ping { .. } = message {
            return Flow::Continue;
        }

        if !session.is_active() {
            let err: BrokerError = ProtocolError::NotInitialized.into();
            reply(session, ServerMessage::error(message.id().cloned(), &err));
            return Flow::Continue;
        }

        match message {
            ClientMessage::Hello { .. } | ClientMessage::Ping { .. } => {}
            ClientMessage::Sub { id, path } => {
                match self.registry.subscriptions().subscribe(session, &path) {
                    Ok(_) => reply(session, ServerMessage::Sub { id, path }),
                    Err(e) => reply(session, ServerMessage::error(id, &e)),
                }
            }
            ClientMessage::Unsub { id, path } => {
                self.registry.subscriptions().unsubscribe(session, &path);
                reply(session, ServerMessage::Unsub { id, path });
            }
            ClientMessage::Request {
                id,
                method,
                path,
                payload,
                headers,
            } => self.request(session, id, method, path, payload, headers).await,
            ClientMessage::Message { id, message } => self.message(session, id, message).await,
        }
        Flow::Continue
    }

    async fn hello(
        &self,
        session: &Arc<Session>,
        id: Option<Value>,
        auth: Option<HelloAuth>,
        subs: Vec<String>,
    ) -> Flow {
        if !session.mark_greeted() {
            let err: BrokerError = ProtocolError::AlreadyInitialized.into();
            reply(session, ServerMessage::error(id, &err));
            return Flow::Continue;
        }

        if session.state().is_pending() {
            if let Err(e) = self.authenticate(session, auth.as_ref()).await {
                reply(session, ServerMessage::error(id, &e));
                return Flow::Close(CloseReason::from(e));
            }
        }

        if !session.is_active() {
            return Flow::Close(session.close_reason().unwrap_or(CloseReason::Requested));
        }

        reply(
            session,
            ServerMessage::Hello {
                id,
                socket: session.id().to_string(),
                heartbeat: self.heartbeat,
            },
        );

        for path in subs {
            if let Err(e) = self.registry.subscriptions().subscribe(session, &path) {
                tracing::debug!(session_id = %session.id(), topic = %path, error = %e, "Initial subscription refused");
                reply(session, ServerMessage::error(Some(Value::String(path)), &e));
            }
        }
        Flow::Continue
    }

    async fn authenticate(&self, session: &Arc<Session>, auth: Option<&HelloAuth>) -> Result<(), BrokerError> {
        let Some(negotiator) = &self.negotiator else {
            return self.registry.activate(session, None);
        };

        if session.transition(crate::session::SessionState::Authenticating).is_err() {
            return Err(ProtocolError::NotActive.into());
        }

        let identity = tokio::select! {
            result = negotiator.authenticate(auth, session.handshake()) => result?,
            _ = session.closing() => return Err(ProtocolError::NotActive.into()),
        };
        self.registry.activate(session, Some(identity))
    }

    async fn request(
        &self,
        session: &Arc<Session>,
        id: Option<Value>,
        method: String,
        path: String,
        payload: Value,
        headers: HashMap<String, String>,
    ) {
        let Some(handler) = &self.requests else {
            let err: BrokerError = ProtocolError::Unhandled("request").into();
            reply(session, ServerMessage::error(id, &err));
            return;
        };

        let ctx = RequestContext::from_socket(session.clone(), method, path, payload, headers);
        let result = handler.handle(ctx).await;
        reply(
            session,
            ServerMessage::Request {
                id,
                status_code: result.status,
                payload: result.payload,
            },
        );
    }

    async fn message(&self, session: &Arc<Session>, id: Option<Value>, message: Value) {
        let Some(handler) = &self.messages else {
            let err: BrokerError = ProtocolError::Unhandled("message").into();
            reply(session, ServerMessage::error(id, &err));
            return;
        };

        match handler.on_message(session, message).await {
            Ok(response) => reply(
                session,
                ServerMessage::Message {
                    id,
                    message: response.unwrap_or(Value::Null),
                },
            ),
            Err(error) => reply(
                session,
                ServerMessage::Error {
                    id,
                    status_code: 500,
                    code: "INTERNAL".to_string(),
                    error,
                },
            ),
        }
    }
}

fn reply(session: &Session, message: ServerMessage) {
    if let Err(e) = session.send(&message) {
        tracing::debug!(session_id = %session.id(), error = %e, "Reply dropped");
    }
}
