//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, caps >= 1)
//! - Cross-field rules (heartbeat timeout below interval, per-user cap needs index)
//! - Detect endpoint collisions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BrokerConfig → Result<(), Vec<ValidationError>>
//! - Runs before any session logic

use thiserror::Error;

use crate::config::schema::{AuthConfig, BrokerConfig, HeaderAllowlist, Toggle};

/// Minimum length of a sealing secret.
pub const MIN_PASSWORD_LEN: usize = 32;

/// A single semantic violation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be at least 1")]
    NotPositive { field: &'static str },

    #[error("{field} must be a table or false")]
    BareTrue { field: &'static str },

    #[error("heartbeat.timeout ({timeout}) must be less than heartbeat.interval ({interval})")]
    HeartbeatTimeout { interval: u64, timeout: u64 },

    #[error("auth.max_connections_per_user requires auth.index = true")]
    PerUserWithoutIndex,

    #[error("{field} must start with '/': {value}")]
    NotAPath { field: &'static str, value: String },

    #[error("auth.endpoint collides with listener.path ({0})")]
    EndpointCollision(String),

    #[error("auth.cookie must not be empty")]
    EmptyCookieName,

    #[error("auth.password must be at least {} characters", MIN_PASSWORD_LEN)]
    ShortPassword,

    #[error("headers entry must be lowercase: {0}")]
    HeaderNotLowercase(String),

    #[error("headers must be a list of names, \"*\" or false (got {0:?})")]
    InvalidHeaders(String),

    #[error("observability.metrics_address is not a socket address: {0}")]
    MetricsAddress(String),
}

/// Validate the whole configuration, collecting every violation.
pub fn validate_config(config: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.listener.path.starts_with('/') {
        errors.push(ValidationError::NotAPath {
            field: "listener.path",
            value: config.listener.path.clone(),
        });
    }

    if config.auth.is_bare_true() {
        errors.push(ValidationError::BareTrue { field: "auth" });
    }
    if let Some(auth) = config.auth() {
        validate_auth(auth, &config.listener.path, &mut errors);
    }

    if config.heartbeat.is_bare_true() {
        errors.push(ValidationError::BareTrue { field: "heartbeat" });
    }
    if let Some(heartbeat) = config.heartbeat() {
        if heartbeat.interval == 0 {
            errors.push(ValidationError::NotPositive { field: "heartbeat.interval" });
        }
        if heartbeat.timeout == 0 {
            errors.push(ValidationError::NotPositive { field: "heartbeat.timeout" });
        }
        if heartbeat.timeout >= heartbeat.interval {
            errors.push(ValidationError::HeartbeatTimeout {
                interval: heartbeat.interval,
                timeout: heartbeat.timeout,
            });
        }
    }

    if config.max_connections == Some(0) {
        errors.push(ValidationError::NotPositive { field: "max_connections" });
    }
    if config.payload.max_chunk_chars == Some(0) {
        errors.push(ValidationError::NotPositive { field: "payload.max_chunk_chars" });
    }
    if config.payload.outbox_capacity == 0 {
        errors.push(ValidationError::NotPositive { field: "payload.outbox_capacity" });
    }

    match &config.headers {
        HeaderAllowlist::Names(names) => {
            for name in names {
                if name.is_empty() || *name != name.to_lowercase() {
                    errors.push(ValidationError::HeaderNotLowercase(name.clone()));
                }
            }
        }
        HeaderAllowlist::Wildcard(pattern) if pattern != "*" => {
            errors.push(ValidationError::InvalidHeaders(pattern.clone()));
        }
        HeaderAllowlist::Switch(true) => {
            errors.push(ValidationError::InvalidHeaders("true".to_string()));
        }
        _ => {}
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_auth(auth: &AuthConfig, listener_path: &str, errors: &mut Vec<ValidationError>) {
    if !auth.endpoint.starts_with('/') {
        errors.push(ValidationError::NotAPath {
            field: "auth.endpoint",
            value: auth.endpoint.clone(),
        });
    } else if auth.endpoint == listener_path {
        errors.push(ValidationError::EndpointCollision(auth.endpoint.clone()));
    }

    if auth.cookie.is_empty() {
        errors.push(ValidationError::EmptyCookieName);
    }

    match auth.timeout {
        Toggle::On(0) => errors.push(ValidationError::NotPositive { field: "auth.timeout" }),
        Toggle::Switch(true) => errors.push(ValidationError::BareTrue { field: "auth.timeout" }),
        _ => {}
    }
    if auth.is_same_site.is_bare_true() {
        errors.push(ValidationError::BareTrue { field: "auth.is_same_site" });
    }

    match auth.max_connections_per_user {
        Some(_) if !auth.index => errors.push(ValidationError::PerUserWithoutIndex),
        Some(0) => errors.push(ValidationError::NotPositive {
            field: "auth.max_connections_per_user",
        }),
        _ => {}
    }

    if auth.kind.needs_password() {
        if let Some(password) = &auth.password {
            if password.secret().chars().count() < MIN_PASSWORD_LEN {
                errors.push(ValidationError::ShortPassword);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthKind, HeartbeatConfig, Password};

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&BrokerConfig::default()).is_ok());
    }

    #[test]
    fn heartbeat_timeout_must_be_below_interval() {
        for (interval, timeout) in [(5000, 5000), (5000, 6000), (1, 1)] {
            let config = BrokerConfig {
                heartbeat: Toggle::On(HeartbeatConfig { interval, timeout }),
                ..Default::default()
            };
            let errors = validate_config(&config).unwrap_err();
            assert!(errors.contains(&ValidationError::HeartbeatTimeout { interval, timeout }));
        }

        let config = BrokerConfig {
            heartbeat: Toggle::On(HeartbeatConfig { interval: 5000, timeout: 4999 }),
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn per_user_cap_requires_index() {
        let mut auth = AuthConfig {
            max_connections_per_user: Some(2),
            ..Default::default()
        };
        let config = BrokerConfig {
            auth: Toggle::On(auth.clone()),
            ..Default::default()
        };
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::PerUserWithoutIndex]
        );

        auth.index = true;
        let config = BrokerConfig {
            auth: Toggle::On(auth),
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let config = BrokerConfig {
            max_connections: Some(0),
            heartbeat: Toggle::Switch(true),
            auth: Toggle::On(AuthConfig {
                endpoint: "nes/auth".into(),
                timeout: Toggle::On(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn short_password_rejected_for_sealing_modes() {
        let auth = AuthConfig {
            kind: AuthKind::Token,
            password: Some(Password::Secret("short".into())),
            ..Default::default()
        };
        let config = BrokerConfig {
            auth: Toggle::On(auth.clone()),
            ..Default::default()
        };
        assert_eq!(validate_config(&config).unwrap_err(), vec![ValidationError::ShortPassword]);

        let config = BrokerConfig {
            auth: Toggle::On(AuthConfig { kind: AuthKind::Direct, ..auth }),
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn header_names_must_be_lowercase() {
        let config = BrokerConfig {
            headers: HeaderAllowlist::Names(vec!["Authorization".into()]),
            ..Default::default()
        };
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::HeaderNotLowercase("Authorization".into())]
        );

        let config = BrokerConfig {
            headers: HeaderAllowlist::Wildcard("*".into()),
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn endpoint_must_not_shadow_socket_path() {
        let mut config = BrokerConfig::default();
        config.listener.path = "/nes/auth".into();
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::EndpointCollision("/nes/auth".into())]
        );
    }
}
