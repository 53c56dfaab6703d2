//! Session health checking.
//!
//! # Data Flow
//! ```text
//! Heartbeat (heartbeat.rs):
//!     Periodic timer
//!     → Sessions silent past interval + timeout are closed
//!     → Every other active session gets a ping
//!
//! Inbound frame of any kind:
//!     → Session::touch (last activity)
//! ```
//!
//! # Design Decisions
//! - One shared task per server, not one timer per session
//! - Liveness is judged on inbound traffic, not on pong matching
//! - The monitor exits when the registry stops and is respawned on start

pub mod heartbeat;

pub use heartbeat::{HeartbeatMonitor, SweepReport};
