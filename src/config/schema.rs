//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the broker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A setting that is either a value or explicitly switched off with `false`.
///
/// `true` is not a valid spelling; validation rejects it so that enabling a
/// block always goes through its table form.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Toggle<T> {
    On(T),
    Switch(bool),
}

impl<T> Toggle<T> {
    /// The configured value, or `None` when switched off.
    pub fn get(&self) -> Option<&T> {
        match self {
            Toggle::On(value) => Some(value),
            Toggle::Switch(_) => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Toggle::On(_))
    }

    pub(crate) fn is_bare_true(&self) -> bool {
        matches!(self, Toggle::Switch(true))
    }
}

impl<T: Default> Default for Toggle<T> {
    fn default() -> Self {
        Toggle::On(T::default())
    }
}

/// Root configuration for the broker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Listener configuration (bind address, socket endpoint).
    pub listener: ListenerConfig,

    /// Handshake authentication, or `false` to accept anonymous sessions.
    pub auth: Toggle<AuthConfig>,

    /// Upgrade request headers copied onto the session.
    pub headers: HeaderAllowlist,

    /// Outbound payload settings.
    pub payload: PayloadConfig,

    /// Liveness probing, or `false` to disable.
    pub heartbeat: Toggle<HeartbeatConfig>,

    /// Global cap on concurrently active sessions.
    pub max_connections: Option<usize>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl BrokerConfig {
    pub fn auth(&self) -> Option<&AuthConfig> {
        self.auth.get()
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatConfig> {
        self.heartbeat.get()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path of the WebSocket upgrade endpoint.
    pub path: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            path: "/".to_string(),
        }
    }
}

/// Which credential flow the auth endpoint and handshake use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Cookie,
    Token,
    #[default]
    Direct,
}

impl AuthKind {
    /// Cookie and token modes need a sealing secret.
    pub fn needs_password(&self) -> bool {
        !matches!(self, AuthKind::Direct)
    }
}

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Sealing secret, optionally tagged with an id for rotation.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Password {
    Secret(String),
    Rotating { id: String, secret: String },
}

impl Password {
    pub fn id(&self) -> &str {
        match self {
            Password::Secret(_) => "",
            Password::Rotating { id, .. } => id,
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            Password::Secret(secret) => secret,
            Password::Rotating { secret, .. } => secret,
        }
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Password")
            .field("id", &self.id())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Path of the credential endpoint.
    pub endpoint: String,

    /// Credential flow.
    #[serde(rename = "type")]
    pub kind: AuthKind,

    /// Cookie name (cookie mode).
    pub cookie: String,

    pub is_secure: bool,
    pub is_http_only: bool,

    /// `false` omits the attribute.
    pub is_same_site: Toggle<SameSite>,

    pub path: Option<String>,
    pub domain: Option<String>,

    /// Cookie lifetime in milliseconds.
    pub ttl: Option<u64>,

    /// Sealing secret. Generated once at startup when absent.
    pub password: Option<Password>,

    /// Track active sessions per user key.
    pub index: bool,

    /// Handshake timeout in milliseconds, or `false`.
    pub timeout: Toggle<u64>,

    /// Requires `index = true`.
    pub max_connections_per_user: Option<usize>,
}

impl AuthConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.timeout.get().map(|ms| Duration::from_millis(*ms))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            endpoint: "/nes/auth".to_string(),
            kind: AuthKind::Direct,
            cookie: "nes".to_string(),
            is_secure: true,
            is_http_only: true,
            is_same_site: Toggle::On(SameSite::Strict),
            path: Some("/".to_string()),
            domain: None,
            ttl: None,
            password: None,
            index: false,
            timeout: Toggle::On(5000),
            max_connections_per_user: None,
        }
    }
}

/// Upgrade header allowlist: a list of lowercase names, `"*"`, or `false`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum HeaderAllowlist {
    Names(Vec<String>),
    Wildcard(String),
    Switch(bool),
}

impl Default for HeaderAllowlist {
    fn default() -> Self {
        HeaderAllowlist::Switch(false)
    }
}

/// Outbound payload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// Split outbound frames longer than this many chars.
    pub max_chunk_chars: Option<usize>,

    /// Capacity of each session's delivery queue.
    pub outbox_capacity: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: None,
            outbox_capacity: 1024,
        }
    }
}

/// Heartbeat configuration, in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between liveness probes.
    pub interval: u64,

    /// Grace period for a probe response. Must be below `interval`.
    pub timeout: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: 15_000,
            timeout: 5_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
