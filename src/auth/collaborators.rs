//! Host-provided authentication collaborators.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Password;
use crate::error::AuthError;

/// Identity attached to an authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub credentials: Value,
    #[serde(default)]
    pub artifacts: Value,
}

impl AuthIdentity {
    pub fn new(credentials: Value, artifacts: Value) -> Self {
        Self { credentials, artifacts }
    }

    /// Per-user accounting key: `credentials.user` as a string.
    pub fn user_key(&self) -> Option<String> {
        match self.credentials.get("user")? {
            Value::String(user) => Some(user.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Decides whether a request carries valid credentials.
///
/// `Ok(None)` means the request is unauthenticated; `Err` is reserved for
/// failures of the check itself.
#[async_trait]
pub trait CredentialCheck: Send + Sync {
    async fn check(&self, headers: &HeaderMap) -> Result<Option<AuthIdentity>, AuthError>;
}

/// Turns an identity into an opaque string and back.
#[async_trait]
pub trait Sealer: Send + Sync {
    async fn seal(&self, identity: &AuthIdentity, password: &Password) -> Result<String, AuthError>;

    async fn unseal(&self, sealed: &str, password: &Password) -> Result<AuthIdentity, AuthError>;
}
