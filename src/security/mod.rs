//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request:
//!     → headers.rs (allowlist headers copied onto the session)
//!
//! Handshake complete (or connect, when auth is disabled):
//!     → admission.rs (global and per-user caps)
//!     → session becomes active, or closes with a policy violation
//! ```
//!
//! # Design Decisions
//! - Fail closed: a session is active only after admission succeeds
//! - Counters change only on success and are released exactly once
//! - No trust in client input

pub mod admission;
pub mod headers;

pub use admission::AdmissionController;
pub use headers::filter_headers;
