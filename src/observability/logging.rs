//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level; without either the broker and
//! HTTP layers log at `info`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

const DEFAULT_FILTER: &str = "socket_broker=info,tower_http=info";

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    match config.log_level.trim() {
        "" => DEFAULT_FILTER.to_string(),
        level if level.contains('=') => level.to_string(),
        level => format!("socket_broker={level},tower_http={level}"),
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_applies_to_broker_and_http() {
        let config = ObservabilityConfig {
            log_level: "debug".into(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(default_filter(&config), "socket_broker=debug,tower_http=debug");
    }

    #[test]
    fn directives_pass_through() {
        let config = ObservabilityConfig {
            log_level: "socket_broker=trace".into(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(default_filter(&config), "socket_broker=trace");
    }

    #[test]
    fn empty_level_uses_default() {
        let config = ObservabilityConfig {
            log_level: String::new(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(default_filter(&config), DEFAULT_FILTER);
    }
}
