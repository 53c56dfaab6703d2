//! Host-facing broker facade.
//!
//! # Responsibilities
//! - Assemble registry, negotiator, dispatcher and broadcaster from config
//! - Start and stop the session registry and the heartbeat task
//! - Expose publish / broadcast / subscription declarations to the host
//!
//! ```ignore
//! let broker = Broker::builder(config)
//!     .credentials(Arc::new(MyCheck))
//!     .build()?;
//! broker.subscription("/items/{id}", SubscriptionOptions::default())?;
//! let app = broker.router();
//! ```

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::auth::{AuthNegotiator, CredentialCheck, HmacSealer, Sealer};
use crate::config::{validate_config, BrokerConfig, ConfigError};
use crate::error::{CloseReason, ProtocolError, ShutdownError};
use crate::health::HeartbeatMonitor;
use crate::lifecycle::SessionRegistry;
use crate::lock;
use crate::protocol::HeartbeatInfo;
use crate::pubsub::{
    BroadcastOptions, Broadcaster, DeliveryReport, EachSocketOptions, PublishOptions,
    SubscriptionOptions,
};
use crate::session::{Dispatcher, MessageHandler, RequestHandler, Session, SessionId};

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    credentials: Option<Arc<dyn CredentialCheck>>,
    sealer: Option<Arc<dyn Sealer>>,
    requests: Option<Arc<dyn RequestHandler>>,
    messages: Option<Arc<dyn MessageHandler>>,
}

impl BrokerBuilder {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            credentials: None,
            sealer: None,
            requests: None,
            messages: None,
        }
    }

    /// Credential check used by the auth endpoint and direct handshakes.
    pub fn credentials(mut self, check: Arc<dyn CredentialCheck>) -> Self {
        self.credentials = Some(check);
        self
    }

    /// Replace the default HMAC sealer.
    pub fn sealer(mut self, sealer: Arc<dyn Sealer>) -> Self {
        self.sealer = Some(sealer);
        self
    }

    pub fn requests(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.requests = Some(handler);
        self
    }

    pub fn messages(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.messages = Some(handler);
        self
    }

    /// Validate the config and wire everything together. The broker starts
    /// stopped; call [`Broker::start`] or run it through `HttpServer`.
    pub fn build(self) -> Result<Arc<Broker>, ConfigError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let negotiator = match self.config.auth() {
            Some(auth) => {
                let credentials = self
                    .credentials
                    .ok_or(ConfigError::MissingCollaborator("credential check"))?;
                let sealer = self.sealer.unwrap_or_else(|| Arc::new(HmacSealer));
                Some(Arc::new(AuthNegotiator::new(auth.clone(), credentials, sealer)))
            }
            None => None,
        };

        let heartbeat = self.config.heartbeat().map(|h| HeartbeatInfo {
            interval: h.interval,
            timeout: h.timeout,
        });

        let registry = Arc::new(SessionRegistry::new(&self.config));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            negotiator.clone(),
            self.requests,
            self.messages,
            heartbeat,
        ));

        tracing::debug!(
            auth = ?negotiator.as_ref().map(|n| n.kind()),
            heartbeat = heartbeat.is_some(),
            "Broker built"
        );

        Ok(Arc::new(Broker {
            broadcaster: Broadcaster::new(registry.clone()),
            config: Arc::new(self.config),
            registry,
            negotiator,
            dispatcher,
            monitor: Mutex::new(None),
        }))
    }
}

/// A running (or startable) socket broker.
pub struct Broker {
    config: Arc<BrokerConfig>,
    registry: Arc<SessionRegistry>,
    broadcaster: Broadcaster,
    negotiator: Option<Arc<AuthNegotiator>>,
    dispatcher: Arc<Dispatcher>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Broker {
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder::new(config)
    }

    /// Start accepting sessions and spawn the heartbeat task.
    pub fn start(&self) {
        if !self.registry.start() {
            return;
        }
        if let Some(heartbeat) = self.config.heartbeat() {
            let monitor = HeartbeatMonitor::new(self.registry.clone(), heartbeat);
            let handle = tokio::spawn(monitor.run(self.registry.watch_stopped()));
            if let Some(previous) = lock(&self.monitor).replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop accepting, drain every session, then stop the heartbeat task.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        let result = self.registry.stop().await;
        let monitor = lock(&self.monitor).take();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        result
    }

    pub fn is_stopped(&self) -> bool {
        self.registry.is_stopped()
    }

    /// Declare a permitted topic pattern.
    pub fn subscription(&self, pattern: &str, options: SubscriptionOptions) -> Result<(), ProtocolError> {
        self.registry.subscriptions().declare(pattern, options)
    }

    /// Deliver `message` to every subscriber of `topic`.
    pub async fn publish(
        &self,
        topic: &str,
        message: Value,
        options: PublishOptions,
    ) -> Result<DeliveryReport, ProtocolError> {
        self.broadcaster.publish(topic, message, options).await
    }

    /// Deliver `message` to every active session.
    pub fn broadcast(&self, message: Value, options: BroadcastOptions) -> DeliveryReport {
        self.broadcaster.broadcast(message, options)
    }

    /// Visit active sessions. Returns how many were visited.
    pub fn each_socket<F>(&self, options: &EachSocketOptions, f: F) -> usize
    where
        F: FnMut(&Arc<Session>),
    {
        self.broadcaster.each_socket(options, f)
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.registry.get(id)
    }

    /// Close one session on the host's request.
    pub fn disconnect(&self, id: SessionId) -> bool {
        match self.registry.get(id) {
            Some(session) => self.registry.close_session(&session, CloseReason::Requested),
            None => false,
        }
    }

    /// Axum router serving the socket and auth endpoints.
    pub fn router(self: &Arc<Self>) -> axum::Router {
        crate::http::server::build_router(self.clone())
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn negotiator(&self) -> Option<&Arc<AuthNegotiator>> {
        self.negotiator.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
