//! socket-broker server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                    SOCKET BROKER                     │
//!   HTTP request     │  ┌──────────┐    ┌────────────────┐                  │
//!   ─────────────────┼─▶│   http   │───▶│ AuthNegotiator │ (auth endpoint)  │
//!                    │  │  server  │    └────────────────┘                  │
//!   WebSocket        │  │          │    ┌────────────────┐   ┌───────────┐  │
//!   ◀────────────────┼─▶│websocket │───▶│   Dispatcher   │──▶│  Session  │  │
//!                    │  └──────────┘    └───────┬────────┘   │  Registry │  │
//!                    │                          │            └─────┬─────┘  │
//!                    │        ┌─────────────────┴──────┐           │        │
//!                    │        ▼                        ▼           ▼        │
//!                    │  ┌─────────────┐   ┌──────────────┐ ┌────────────┐   │
//!                    │  │Subscriptions│◀──│ Broadcaster  │ │ Admission  │   │
//!                    │  └─────────────┘   └──────────────┘ └────────────┘   │
//!                    │                                                      │
//!                    │  Heartbeat monitor · Shutdown drain · Metrics · Logs │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! The binary ships a demo credential check: any `Authorization: Bearer <name>`
//! header authenticates as user `<name>`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use socket_broker::auth::{AuthIdentity, CredentialCheck};
use socket_broker::config::{load_config, BrokerConfig};
use socket_broker::error::AuthError;
use socket_broker::lifecycle::{wait_for_signal, Shutdown};
use socket_broker::observability::{logging, metrics};
use socket_broker::{Broker, HttpServer};

#[derive(Parser)]
#[command(name = "socket-broker")]
#[command(about = "WebSocket session broker", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

/// Accepts `Authorization: Bearer <name>` as user `<name>`.
struct BearerDemo;

#[async_trait]
impl CredentialCheck for BearerDemo {
    async fn check(&self, headers: &HeaderMap) -> Result<Option<AuthIdentity>, AuthError> {
        let user = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|user| !user.is_empty());

        Ok(user.map(|user| AuthIdentity::new(json!({ "user": user }), json!({ "scheme": "bearer" }))))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => BrokerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("socket-broker v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        path = %config.listener.path,
        auth = ?config.auth().map(|a| a.kind),
        heartbeat = config.heartbeat.is_enabled(),
        max_connections = ?config.max_connections,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let broker = Broker::builder(config)
        .credentials(Arc::new(BearerDemo))
        .build()?;

    let shutdown = Shutdown::new();
    let server = HttpServer::new(broker);
    let stopped = shutdown.wait();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, stopped).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
