//! Message fan-out.
//!
//! # Responsibilities
//! - Deliver `pub` frames to topic subscribers
//! - Deliver `update` frames to every active session
//! - Iterate sessions for host code
//!
//! # Design Decisions
//! - A frame is encoded once and shared unless a filter rewrites it
//! - Failures are per recipient: logged, counted and reported, never raised
//! - Deliveries only enqueue; ordering per recipient is the queue order

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ProtocolError, TransportError};
use crate::lifecycle::SessionRegistry;
use crate::observability::metrics;
use crate::protocol::ServerMessage;
use crate::pubsub::pattern::{validate_topic, TopicParams};
use crate::session::{Session, SessionId};

/// What a filter decided for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Deliver,
    /// Deliver this message instead of the published one.
    Replace(Value),
    Skip,
}

/// Recipient-specific view passed to a [`DeliveryFilter`].
#[derive(Debug)]
pub struct FilterContext<'a> {
    pub session: &'a Arc<Session>,
    pub topic: &'a str,
    pub params: &'a TopicParams,
    /// Host data attached to the publish, never sent to clients.
    pub internal: Option<&'a Value>,
}

/// Per-recipient publish hook declared with a topic pattern.
#[async_trait]
pub trait DeliveryFilter: Send + Sync {
    async fn filter(&self, message: &Value, ctx: FilterContext<'_>) -> FilterOutcome;
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Session that must not receive the message (usually the sender).
    pub exclude: Option<SessionId>,
    /// Only deliver to sessions of this user.
    pub user: Option<String>,
    /// Passed to the filter.
    pub internal: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    pub exclude: Option<SessionId>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EachSocketOptions {
    /// Only sessions subscribed to this topic.
    pub subscription: Option<String>,
    pub user: Option<String>,
}

/// Outcome of one publish or broadcast.
#[derive(Debug, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: Vec<(SessionId, TransportError)>,
}

impl DeliveryReport {
    fn record(&mut self, kind: &'static str, session: &Session, result: Result<(), TransportError>) {
        match result {
            Ok(()) => {
                self.delivered += 1;
                metrics::record_delivery(kind, "delivered");
            }
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, kind, "Delivery failed");
                metrics::record_delivery(kind, "failed");
                self.failed.push((session.id(), e));
            }
        }
    }

    fn skip(&mut self, kind: &'static str) {
        self.skipped += 1;
        metrics::record_delivery(kind, "skipped");
    }
}

fn user_matches(session: &Session, user: Option<&str>) -> bool {
    match user {
        Some(user) => session.user().as_deref() == Some(user),
        None => true,
    }
}

fn encode(message: &ServerMessage) -> Result<Arc<str>, TransportError> {
    serde_json::to_string(message)
        .map(Arc::from)
        .map_err(|e| TransportError::Encode(e.to_string()))
}

/// Delivers messages to sessions held by a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `{type:"pub", path, message}` to every subscriber of `topic`.
    pub async fn publish(
        &self,
        topic: &str,
        message: Value,
        options: PublishOptions,
    ) -> Result<DeliveryReport, ProtocolError> {
        validate_topic(topic)?;
        let subscriptions = self.registry.subscriptions();
        let policy = subscriptions.policy_for(topic).unwrap_or(None);
        let filter = policy.as_ref().and_then(|p| p.options.filter.clone());
        let empty = TopicParams::new();
        let params = policy.as_ref().map(|p| &p.params).unwrap_or(&empty);

        let mut report = DeliveryReport::default();
        let shared = encode(&ServerMessage::Pub {
            path: topic.to_string(),
            message: message.clone(),
        });

        for id in subscriptions.subscribers(topic) {
            let Some(session) = self.registry.get(id) else {
                continue;
            };
            if !session.is_active()
                || options.exclude == Some(id)
                || !user_matches(&session, options.user.as_deref())
            {
                report.skip("pub");
                continue;
            }

            let frame = match &filter {
                None => shared.clone(),
                Some(filter) => {
                    let ctx = FilterContext {
                        session: &session,
                        topic,
                        params,
                        internal: options.internal.as_ref(),
                    };
                    match filter.filter(&message, ctx).await {
                        FilterOutcome::Deliver => shared.clone(),
                        FilterOutcome::Replace(replacement) => encode(&ServerMessage::Pub {
                            path: topic.to_string(),
                            message: replacement,
                        }),
                        FilterOutcome::Skip => {
                            report.skip("pub");
                            continue;
                        }
                    }
                }
            };
            report.record("pub", &session, frame.and_then(|f| session.deliver(f)));
        }

        tracing::debug!(
            topic = %topic,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Published"
        );
        Ok(report)
    }

    /// Send `{type:"update", message}` to every active session.
    pub fn broadcast(&self, message: Value, options: BroadcastOptions) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let frame = encode(&ServerMessage::Update { message });

        for session in self.registry.sessions() {
            if !session.is_active() {
                continue;
            }
            if options.exclude == Some(session.id())
                || !user_matches(&session, options.user.as_deref())
            {
                report.skip("update");
                continue;
            }
            report.record("update", &session, frame.clone().and_then(|f| session.deliver(f)));
        }

        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast"
        );
        report
    }

    /// Call `f` for each matching active session. Returns how many matched.
    pub fn each_socket<F>(&self, options: &EachSocketOptions, mut f: F) -> usize
    where
        F: FnMut(&Arc<Session>),
    {
        let candidates: Vec<Arc<Session>> = match &options.subscription {
            Some(topic) => self
                .registry
                .subscriptions()
                .subscribers(topic)
                .into_iter()
                .filter_map(|id| self.registry.get(id))
                .collect(),
            None => self.registry.sessions(),
        };

        let mut count = 0;
        for session in candidates {
            if session.is_active() && user_matches(&session, options.user.as_deref()) {
                f(&session);
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthIdentity;
    use crate::config::{BrokerConfig, Toggle};
    use crate::pubsub::SubscriptionOptions;
    use crate::session::{Handshake, OutboxReceiver};
    use serde_json::json;

    fn registry() -> Arc<SessionRegistry> {
        let config = BrokerConfig {
            auth: Toggle::Switch(false),
            ..BrokerConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new(&config));
        registry.start();
        registry
    }

    fn connect(registry: &Arc<SessionRegistry>) -> (Arc<Session>, OutboxReceiver) {
        registry.accept(Handshake::default()).unwrap()
    }

    fn connect_as(registry: &Arc<SessionRegistry>, user: &str) -> (Arc<Session>, OutboxReceiver) {
        let (session, rx) = connect(registry);
        session.set_identity(Some(AuthIdentity::new(json!({ "user": user }), json!({}))));
        (session, rx)
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn publish_reaches_exactly_subscribers_in_order() {
        let registry = registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        let (_c, mut rx_c) = connect(&registry);
        registry.subscriptions().subscribe(&a, "/t").unwrap();
        registry.subscriptions().subscribe(&b, "/t").unwrap();

        for n in 0..3 {
            let report = broadcaster
                .publish("/t", json!(n), PublishOptions::default())
                .await
                .unwrap();
            assert_eq!(report.delivered, 2);
        }

        let expected: Vec<Value> = (0..3)
            .map(|n| json!({ "type": "pub", "path": "/t", "message": n }))
            .collect();
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn publish_honors_exclude_and_user() {
        let registry = registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let (a, mut rx_a) = connect_as(&registry, "alice");
        let (b, mut rx_b) = connect_as(&registry, "bob");
        registry.subscriptions().subscribe(&a, "/t").unwrap();
        registry.subscriptions().subscribe(&b, "/t").unwrap();

        let report = broadcaster
            .publish(
                "/t",
                json!("x"),
                PublishOptions {
                    exclude: Some(a.id()),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!((report.delivered, report.skipped), (1, 1));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        let report = broadcaster
            .publish(
                "/t",
                json!("y"),
                PublishOptions {
                    user: Some("alice".into()),
                    ..PublishOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn slow_recipient_does_not_affect_others() {
        let config = BrokerConfig {
            auth: Toggle::Switch(false),
            payload: crate::config::PayloadConfig {
                outbox_capacity: 1,
                ..Default::default()
            },
            ..BrokerConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new(&config));
        registry.start();
        let broadcaster = Broadcaster::new(registry.clone());
        let (slow, _rx_slow) = connect(&registry);
        let (fast, mut rx_fast) = connect(&registry);
        registry.subscriptions().subscribe(&slow, "/t").unwrap();
        registry.subscriptions().subscribe(&fast, "/t").unwrap();

        broadcaster.publish("/t", json!(1), PublishOptions::default()).await.unwrap();
        drain(&mut rx_fast);
        let report = broadcaster
            .publish("/t", json!(2), PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![(slow.id(), TransportError::Backpressure)]);
        assert_eq!(drain(&mut rx_fast).len(), 1);
    }

    struct Redact;

    #[async_trait]
    impl DeliveryFilter for Redact {
        async fn filter(&self, message: &Value, ctx: FilterContext<'_>) -> FilterOutcome {
            match ctx.session.user().as_deref() {
                Some("admin") => FilterOutcome::Deliver,
                Some(_) => FilterOutcome::Replace(json!({ "id": message["id"] })),
                None => FilterOutcome::Skip,
            }
        }
    }

    #[tokio::test]
    async fn filter_decides_per_recipient() {
        let registry = registry();
        registry
            .subscriptions()
            .declare(
                "/items/{id}",
                SubscriptionOptions {
                    filter: Some(Arc::new(Redact)),
                    ..SubscriptionOptions::default()
                },
            )
            .unwrap();
        let broadcaster = Broadcaster::new(registry.clone());
        let (admin, mut rx_admin) = connect_as(&registry, "admin");
        let (user, mut rx_user) = connect_as(&registry, "bob");
        let (anon, mut rx_anon) = connect(&registry);
        for session in [&admin, &user, &anon] {
            registry.subscriptions().subscribe(session, "/items/1").unwrap();
        }

        let report = broadcaster
            .publish("/items/1", json!({ "id": 1, "secret": "s" }), PublishOptions::default())
            .await
            .unwrap();
        assert_eq!((report.delivered, report.skipped), (2, 1));
        assert_eq!(drain(&mut rx_admin)[0]["message"]["secret"], "s");
        assert_eq!(drain(&mut rx_user)[0]["message"], json!({ "id": 1 }));
        assert!(drain(&mut rx_anon).is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_active_session() {
        let registry = registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let (_a, mut rx_a) = connect_as(&registry, "alice");
        let (_b, mut rx_b) = connect_as(&registry, "bob");

        let report = broadcaster.broadcast(json!("hi"), BroadcastOptions::default());
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut rx_a), vec![json!({ "type": "update", "message": "hi" })]);
        assert_eq!(drain(&mut rx_b).len(), 1);

        let report = broadcaster.broadcast(
            json!("bob only"),
            BroadcastOptions {
                user: Some("bob".into()),
                ..BroadcastOptions::default()
            },
        );
        assert_eq!(report.delivered, 1);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn each_socket_filters_by_subscription() {
        let registry = registry();
        let broadcaster = Broadcaster::new(registry.clone());
        let (a, _rx_a) = connect(&registry);
        let (_b, _rx_b) = connect(&registry);
        registry.subscriptions().subscribe(&a, "/t").unwrap();

        let mut seen = Vec::new();
        let count = broadcaster.each_socket(
            &EachSocketOptions {
                subscription: Some("/t".into()),
                ..EachSocketOptions::default()
            },
            |session| seen.push(session.id()),
        );
        assert_eq!(count, 1);
        assert_eq!(seen, vec![a.id()]);
        assert_eq!(broadcaster.each_socket(&EachSocketOptions::default(), |_| {}), 2);
    }
}
