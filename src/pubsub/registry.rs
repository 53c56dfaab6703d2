//! Topic subscriptions.
//!
//! # Responsibilities
//! - Hold the host's declared topic patterns and their options
//! - Map each topic to the sessions subscribed to it
//! - Keep the session-side and topic-side views in step
//!
//! # Design Decisions
//! - Topics are created on first subscribe and dropped when empty
//! - `subscribe` checks that the session is active while holding the
//!   session's topic lock; close flips the state first, then takes the
//!   same lock to drain, so a closing session can never be re-added
//! - With no declared patterns every valid topic path is allowed

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use crate::error::{AuthError, BrokerError, ProtocolError};
use crate::pubsub::broadcaster::DeliveryFilter;
use crate::pubsub::pattern::{validate_topic, TopicParams, TopicPattern};
use crate::session::{Session, SessionId};

/// Options attached to a declared topic pattern.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Reject anonymous sessions.
    pub require_auth: bool,
    /// Per-recipient hook run on every publish to a matching topic.
    pub filter: Option<Arc<dyn DeliveryFilter>>,
}

impl std::fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("require_auth", &self.require_auth)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// The declaration governing one concrete topic.
#[derive(Debug, Clone)]
pub struct TopicPolicy {
    pub pattern: String,
    pub params: TopicParams,
    pub options: SubscriptionOptions,
}

#[derive(Debug)]
struct Declared {
    pattern: TopicPattern,
    options: SubscriptionOptions,
}

/// Topic to subscriber map.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<String, HashSet<SessionId>>,
    declared: RwLock<Vec<Declared>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a permitted topic pattern. Earlier declarations win when
    /// several match the same topic.
    pub fn declare(&self, pattern: &str, options: SubscriptionOptions) -> Result<(), ProtocolError> {
        let pattern = TopicPattern::parse(pattern)?;
        let mut declared = self.declared.write().unwrap_or_else(PoisonError::into_inner);
        if declared.iter().any(|d| d.pattern == pattern) {
            tracing::warn!(pattern = %pattern, "Topic pattern declared twice, keeping the first");
            return Ok(());
        }
        tracing::debug!(pattern = %pattern, require_auth = options.require_auth, "Topic pattern declared");
        declared.push(Declared { pattern, options });
        Ok(())
    }

    /// Policy for `topic`. `Ok(None)` when nothing is declared at all.
    pub fn policy_for(&self, topic: &str) -> Result<Option<TopicPolicy>, ProtocolError> {
        validate_topic(topic)?;
        let declared = self.declared.read().unwrap_or_else(PoisonError::into_inner);
        if declared.is_empty() {
            return Ok(None);
        }
        declared
            .iter()
            .find_map(|d| {
                d.pattern.matches(topic).map(|params| TopicPolicy {
                    pattern: d.pattern.to_string(),
                    params,
                    options: d.options.clone(),
                })
            })
            .map(Some)
            .ok_or_else(|| ProtocolError::TopicNotPermitted(topic.to_string()))
    }

    /// Add `session` to `topic`. Returns `false` when already subscribed.
    pub fn subscribe(&self, session: &Session, topic: &str) -> Result<bool, BrokerError> {
        let policy = self.policy_for(topic)?;
        if let Some(policy) = &policy {
            if policy.options.require_auth && !session.is_authenticated() {
                return Err(AuthError::Unauthenticated.into());
            }
        }

        let mut topics = session.topic_set();
        if !session.is_active() {
            return Err(ProtocolError::NotActive.into());
        }
        if !topics.insert(topic.to_string()) {
            return Ok(false);
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(session.id());
        drop(topics);

        tracing::debug!(session_id = %session.id(), topic = %topic, "Subscribed");
        Ok(true)
    }

    /// Remove `session` from `topic`. No-op when absent.
    pub fn unsubscribe(&self, session: &Session, topic: &str) -> bool {
        let mut topics = session.topic_set();
        if !topics.remove(topic) {
            return false;
        }
        self.detach(session.id(), topic);
        drop(topics);

        tracing::debug!(session_id = %session.id(), topic = %topic, "Unsubscribed");
        true
    }

    /// Drop every subscription held by `session`.
    pub fn remove_session(&self, session: &Session) -> usize {
        let mut topics = session.topic_set();
        let count = topics.len();
        for topic in topics.drain() {
            self.detach(session.id(), &topic);
        }
        count
    }

    fn detach(&self, id: SessionId, topic: &str) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&id);
        }
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    /// Sessions subscribed to `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
