//! Credential issuing (HTTP endpoint) and verification (socket handshake).
//!
//! # Flows
//! ```text
//! direct: endpoint → CredentialCheck → {credentials, artifacts}
//!         hello.auth (header map) → CredentialCheck
//! token:  endpoint → CredentialCheck → Sealer::seal → {token}
//!         hello.auth (token) → Sealer::unseal
//! cookie: endpoint → CredentialCheck → Sealer::seal → Set-Cookie
//!         upgrade Cookie header → Sealer::unseal
//! ```

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::auth::collaborators::{AuthIdentity, CredentialCheck, Sealer};
use crate::auth::sealing::generate_password;
use crate::config::{AuthConfig, AuthKind, Password};
use crate::error::AuthError;
use crate::observability::metrics;
use crate::protocol::HelloAuth;
use crate::session::Handshake;

/// Outcome of a call to the auth endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthResponse {
    Unauthenticated,
    Direct { credentials: Value, artifacts: Value },
    Token { token: String },
    Cookie { set_cookie: String },
    Failed { error: String },
}

impl AuthResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthResponse::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthResponse::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            AuthResponse::Unauthenticated => json!({ "status": "unauthenticated" }),
            AuthResponse::Direct { credentials, artifacts } => json!({
                "status": "authenticated",
                "credentials": credentials,
                "artifacts": artifacts,
            }),
            AuthResponse::Token { token } => json!({ "status": "authenticated", "token": token }),
            AuthResponse::Cookie { .. } => json!({ "status": "authenticated" }),
            AuthResponse::Failed { error } => json!({ "status": "error", "error": error }),
        }
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(self.body());
        match &self {
            AuthResponse::Cookie { set_cookie } => match HeaderValue::from_str(set_cookie) {
                Ok(value) => (status, [(header::SET_COOKIE, value)], body).into_response(),
                Err(e) => {
                    let failed = AuthResponse::Failed { error: e.to_string() };
                    (failed.status(), Json(failed.body())).into_response()
                }
            },
            _ => (status, body).into_response(),
        }
    }
}

/// Runs the configured credential flow.
pub struct AuthNegotiator {
    config: AuthConfig,
    password: Password,
    credentials: Arc<dyn CredentialCheck>,
    sealer: Arc<dyn Sealer>,
}

impl std::fmt::Debug for AuthNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthNegotiator")
            .field("kind", &self.config.kind)
            .field("password", &self.password)
            .finish_non_exhaustive()
    }
}

impl AuthNegotiator {
    /// A random password is generated once here when none is configured.
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialCheck>,
        sealer: Arc<dyn Sealer>,
    ) -> Self {
        let password = config.password.clone().unwrap_or_else(generate_password);
        Self {
            config,
            password,
            credentials,
            sealer,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn kind(&self) -> AuthKind {
        self.config.kind
    }

    /// Handle a request to the auth endpoint.
    pub async fn issue(&self, headers: &HeaderMap) -> AuthResponse {
        let identity = match self.credentials.check(headers).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                metrics::record_auth("unauthenticated");
                return AuthResponse::Unauthenticated;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Credential check failed");
                metrics::record_auth("error");
                return AuthResponse::Failed { error: e.to_string() };
            }
        };

        let response = match self.config.kind {
            AuthKind::Direct => AuthResponse::Direct {
                credentials: identity.credentials,
                artifacts: identity.artifacts,
            },
            AuthKind::Token => match self.sealer.seal(&identity, &self.password).await {
                Ok(token) => AuthResponse::Token { token },
                Err(e) => AuthResponse::Failed { error: e.to_string() },
            },
            AuthKind::Cookie => match self.sealer.seal(&identity, &self.password).await {
                Ok(sealed) => AuthResponse::Cookie {
                    set_cookie: self.set_cookie(&sealed),
                },
                Err(e) => AuthResponse::Failed { error: e.to_string() },
            },
        };

        match &response {
            AuthResponse::Failed { error } => {
                tracing::warn!(error = %error, "Failed to issue credentials");
                metrics::record_auth("error");
            }
            _ => {
                tracing::debug!(kind = ?self.config.kind, "Credentials issued");
                metrics::record_auth("issued");
            }
        }
        response
    }

    /// Verify the credentials presented at socket handshake.
    pub async fn authenticate(
        &self,
        auth: Option<&HelloAuth>,
        handshake: &Handshake,
    ) -> Result<AuthIdentity, AuthError> {
        let result = match self.config.kind {
            AuthKind::Direct => match auth {
                Some(HelloAuth::Headers(map)) => {
                    let headers = header_map(map)?;
                    match self.credentials.check(&headers).await {
                        Ok(Some(identity)) => Ok(identity),
                        Ok(None) => Err(AuthError::InvalidCredentials("rejected by credential check".into())),
                        Err(e) => Err(e),
                    }
                }
                Some(HelloAuth::Token(_)) => {
                    Err(AuthError::InvalidCredentials("expected a header map".into()))
                }
                None => Err(AuthError::MissingCredentials),
            },
            AuthKind::Token => match auth {
                Some(HelloAuth::Token(token)) => self.sealer.unseal(token, &self.password).await,
                Some(HelloAuth::Headers(_)) => {
                    Err(AuthError::InvalidCredentials("expected a token".into()))
                }
                None => Err(AuthError::MissingCredentials),
            },
            AuthKind::Cookie => {
                let cookie = handshake
                    .cookie
                    .as_deref()
                    .and_then(|raw| cookie_value(raw, &self.config.cookie))
                    .ok_or(AuthError::MissingCredentials)?;
                self.sealer.unseal(cookie, &self.password).await
            }
        };

        let outcome = if result.is_ok() { "authenticated" } else { "rejected" };
        metrics::record_auth(outcome);
        result
    }

    fn set_cookie(&self, value: &str) -> String {
        let config = &self.config;
        let mut cookie = format!("{}={}", config.cookie, value);
        if let Some(path) = &config.path {
            cookie.push_str(&format!("; Path={}", path));
        }
        if let Some(domain) = &config.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }
        if let Some(ttl) = config.ttl {
            // Max-Age=0 deletes the cookie, so partial seconds round up.
            cookie.push_str(&format!("; Max-Age={}", ttl.div_ceil(1000)));
        }
        if config.is_secure {
            cookie.push_str("; Secure");
        }
        if config.is_http_only {
            cookie.push_str("; HttpOnly");
        }
        if let Some(same_site) = config.is_same_site.get() {
            cookie.push_str(&format!("; SameSite={}", same_site.as_str()));
        }
        cookie
    }
}

fn header_map(map: &std::collections::HashMap<String, String>) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::with_capacity(map.len());
    for (name, value) in map {
        let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| AuthError::InvalidCredentials(e.to_string()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Find `name` in a raw `Cookie` header.
fn cookie_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim_matches('"'))
    })
}
