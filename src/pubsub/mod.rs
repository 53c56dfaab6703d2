//! Publish/subscribe.
//!
//! # Data Flow
//! ```text
//! sub frame / hello.subs
//!     → registry.rs (pattern check, topic → session ids)
//!
//! Broker::publish(topic, message)
//!     → registry.rs (subscribers, pattern policy)
//!     → broadcaster.rs (filter per recipient, encode once)
//!     → Session::deliver (per-session queue)
//! ```
//!
//! # Design Decisions
//! - Patterns gate topics only when the host declares some
//! - One slow or broken recipient never blocks or fails the publisher

pub mod broadcaster;
pub mod pattern;
pub mod registry;

pub use broadcaster::{
    BroadcastOptions, Broadcaster, DeliveryFilter, DeliveryReport, EachSocketOptions,
    FilterContext, FilterOutcome, PublishOptions,
};
pub use pattern::{TopicParams, TopicPattern};
pub use registry::{SubscriptionOptions, SubscriptionRegistry, TopicPolicy};
