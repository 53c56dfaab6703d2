//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router (socket endpoint, auth endpoint)
//! - Wire up middleware (tracing, request ID)
//! - Bind server to listener
//! - Start the broker, and drain it before the listener goes away

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::http::websocket::ws_handler;

/// Build the router for `broker`.
pub fn build_router(broker: Arc<Broker>) -> Router {
    let config = broker.config();
    let mut router = Router::new().route(&config.listener.path, get(ws_handler));
    if let Some(auth) = config.auth() {
        router = router.route(&auth.endpoint, get(auth_handler).post(auth_handler));
    }

    router.with_state(broker).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

/// Credential endpoint: runs the host check and returns the configured
/// credential form.
async fn auth_handler(State(broker): State<Arc<Broker>>, headers: HeaderMap) -> Response {
    match broker.negotiator() {
        Some(negotiator) => negotiator.issue(&headers).await.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// HTTP server for the broker.
pub struct HttpServer {
    broker: Arc<Broker>,
    router: Router,
}

impl HttpServer {
    pub fn new(broker: Arc<Broker>) -> Self {
        let router = build_router(broker.clone());
        Self { broker, router }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Serve until `shutdown` resolves, then drain every session.
    ///
    /// Sessions that failed to close cleanly are reported as
    /// `BrokerError::Shutdown` once the listener is closed.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), BrokerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        self.broker.start();
        tracing::info!(
            address = %addr,
            path = %self.broker.config().listener.path,
            "HTTP server starting"
        );

        let (drained_tx, drained_rx) = oneshot::channel();
        let broker = self.broker.clone();
        let drain = async move {
            shutdown.await;
            tracing::info!("Stopping broker");
            let _ = drained_tx.send(broker.stop().await);
        };

        axum::serve(listener, self.router)
            .with_graceful_shutdown(drain)
            .await?;

        // serve can also end on its own; the broker must not outlive it.
        let drained = match drained_rx.await {
            Ok(result) => result,
            Err(_) => self.broker.stop().await,
        };
        tracing::info!("HTTP server stopped");
        drained.map_err(BrokerError::from)
    }
}
