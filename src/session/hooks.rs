//! Host hooks for socket-originated requests and messages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::handle::Session;

/// A request routed to the host.
#[derive(Debug, Clone)]
pub struct RequestContext {
    session: Option<Arc<Session>>,
    pub method: String,
    pub path: String,
    pub payload: Value,
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    /// Context for a plain HTTP request, with no session attached.
    pub fn new(method: impl Into<String>, path: impl Into<String>, payload: Value) -> Self {
        Self {
            session: None,
            method: method.into(),
            path: path.into(),
            payload,
            headers: HashMap::new(),
        }
    }

    /// Context for a `request` frame. Session headers fill in whatever the
    /// frame did not set.
    pub(crate) fn from_socket(
        session: Arc<Session>,
        method: String,
        path: String,
        payload: Value,
        headers: HashMap<String, String>,
    ) -> Self {
        let mut merged = session.headers().clone();
        merged.extend(
            headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value)),
        );
        Self {
            session: Some(session),
            method: method.to_ascii_uppercase(),
            path,
            payload,
            headers: merged,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// The socket this request arrived on, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }
}

/// Response to a socket request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub payload: Value,
}

impl Reply {
    pub fn new(status: u16, payload: Value) -> Self {
        Self { status, payload }
    }

    pub fn ok(payload: Value) -> Self {
        Self::new(200, payload)
    }

    pub fn not_found() -> Self {
        Self::new(404, serde_json::json!({ "error": "Not Found" }))
    }
}

/// Handles `request` frames.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext) -> Reply;
}

/// Handles free-form `message` frames. `Ok(Some(_))` is sent back to the
/// client; `Err` becomes an error frame.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, session: &Arc<Session>, message: Value) -> Result<Option<Value>, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Handshake;

    #[test]
    fn http_context_has_no_session() {
        let ctx = RequestContext::new("GET", "/items", Value::Null);
        assert!(ctx.session().is_none());
    }

    #[test]
    fn socket_context_merges_headers() {
        let handshake = Handshake {
            headers: [
                ("x-tenant".to_string(), "acme".to_string()),
                ("x-region".to_string(), "eu".to_string()),
            ]
            .into(),
            cookie: None,
        };
        let (session, _rx) = Session::new(handshake, 4);
        let ctx = RequestContext::from_socket(
            session.clone(),
            "post".into(),
            "/items".into(),
            Value::Null,
            [("X-Region".to_string(), "us".to_string())].into(),
        );

        assert_eq!(ctx.session().map(|s| s.id()), Some(session.id()));
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.headers["x-tenant"], "acme");
        assert_eq!(ctx.headers["x-region"], "us");
    }
}
