//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BrokerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Blocks that can be disabled accept `false` in place of a table
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, AuthKind, BrokerConfig, HeaderAllowlist, HeartbeatConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, Password, PayloadConfig, SameSite, Toggle,
};
pub use validation::{validate_config, ValidationError};
