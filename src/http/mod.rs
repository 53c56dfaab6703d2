//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → auth endpoint: AuthNegotiator::issue
//!     → socket endpoint: websocket.rs (upgrade)
//!         → SessionRegistry::accept
//!         → reader loop → Dispatcher
//!         → writer task ← session outbox
//! ```

pub mod server;
pub mod websocket;

pub use server::{build_router, HttpServer};
