//! Per-connection sessions.
//!
//! # Data Flow
//! ```text
//! inbound text frame
//!     → dispatch.rs (decode, route by type)
//!     → handshake / sub / unsub / request / message
//!     → replies queued on the session outbox (handle.rs)
//!     → outbox.rs writer → transport
//! ```
//!
//! # Design Decisions
//! - State changes go through one mutex and are published on a watch
//!   channel, so close paths and waiters agree on a single order
//! - Close is idempotent: only the first caller sees the previous state
//! - The outbox is a bounded queue per session; a slow reader only hurts
//!   itself

pub mod dispatch;
pub mod handle;
pub mod hooks;
pub mod outbox;
pub mod state;

pub use dispatch::{Dispatcher, Flow};
pub use handle::{Handshake, OutboxReceiver, Session, SessionId};
pub use hooks::{MessageHandler, Reply, RequestContext, RequestHandler};
pub use outbox::{pump, Frame};
pub use state::SessionState;
