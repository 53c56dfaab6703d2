//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → Validate → Build Broker → start() → Bind listener
//!
//! Session lifecycle (registry.rs):
//!     accept → (hello, auth, admission) → active → close path → closed
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → close every session
//!         → wait for each outbox to flush → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - No drain deadline: stop waits for every close path
//! - Close failures are collected and reported after the drain

pub mod registry;
pub mod shutdown;

pub use registry::SessionRegistry;
pub use shutdown::{wait_for_signal, Shutdown};
