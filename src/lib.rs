//! WebSocket session broker library.
//!
//! Accepts socket connections, authenticates them, enforces connection caps,
//! probes liveness and fans published messages out to topic subscribers.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod pubsub;
pub mod security;
pub mod session;

pub use broker::{Broker, BrokerBuilder};
pub use config::BrokerConfig;
pub use error::{BrokerError, CloseReason};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use session::{Session, SessionId};

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
