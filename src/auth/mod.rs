//! Handshake authentication.
//!
//! # Data Flow
//! ```text
//! HTTP auth endpoint ──► AuthNegotiator::issue ──► CredentialCheck (host)
//!                                              └─► Sealer::seal
//! hello frame ─────────► AuthNegotiator::authenticate ──► Sealer::unseal
//!                                                    └──► CredentialCheck
//! ```
//!
//! # Design Decisions
//! - Credential validation and sealing are injected traits; the broker
//!   never decides who a user is
//! - `HmacSealer` is the default sealer: signed, not encrypted
//! - A missing password is replaced by a random one once at construction,
//!   so sealed values do not survive a restart

pub mod collaborators;
pub mod negotiator;
pub mod sealing;

pub use collaborators::{AuthIdentity, CredentialCheck, Sealer};
pub use negotiator::{AuthNegotiator, AuthResponse};
pub use sealing::{generate_password, HmacSealer};
