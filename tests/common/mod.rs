//! Shared utilities for socket-level integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use socket_broker::auth::{AuthIdentity, CredentialCheck};
use socket_broker::error::{AuthError, BrokerError};
use socket_broker::{Broker, BrokerBuilder, BrokerConfig, HttpServer, Shutdown};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// `Authorization: Bearer <user>` authenticates as `<user>`.
pub struct BearerCheck;

#[async_trait]
impl CredentialCheck for BearerCheck {
    async fn check(&self, headers: &HeaderMap) -> Result<Option<AuthIdentity>, AuthError> {
        let user = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        Ok(user.map(|user| AuthIdentity::new(json!({ "user": user }), json!({}))))
    }
}

/// A broker served on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub broker: Arc<Broker>,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), BrokerError>>,
}

impl TestServer {
    pub async fn start(config: BrokerConfig) -> Self {
        Self::start_with(Broker::builder(config).credentials(Arc::new(BearerCheck))).await
    }

    pub async fn start_with(builder: BrokerBuilder) -> Self {
        let broker = builder.build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = Shutdown::new();
        let server = HttpServer::new(broker.clone());
        let handle = tokio::spawn(server.run(listener, shutdown.wait()));

        Self {
            addr,
            broker,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.broker.config().listener.path)
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.ws_url()).await.unwrap();
        client
    }

    pub async fn connect_with_cookie(&self, cookie: &str) -> Client {
        let mut request = self.ws_url().into_client_request().unwrap();
        request
            .headers_mut()
            .insert(header::COOKIE, cookie.parse().unwrap());
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) -> Result<(), BrokerError> {
        self.shutdown.trigger();
        tokio::time::timeout(RECV_TIMEOUT, self.handle)
            .await
            .expect("server did not stop in time")
            .unwrap()
    }
}

/// Config with heartbeats off and auth off.
pub fn open_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.auth = socket_broker::config::Toggle::Switch(false);
    config.heartbeat = socket_broker::config::Toggle::Switch(false);
    config
}

pub async fn send(client: &mut Client, frame: Value) {
    client.send(Message::text(frame.to_string())).await.unwrap();
}

/// Next JSON frame, skipping heartbeat pings.
pub async fn recv(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("no frame within timeout")
            .expect("socket ended")
            .unwrap();
        if let Message::Text(text) = message {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] != "ping" {
                return value;
            }
        }
    }
}

/// Wait for the close frame and return its code.
pub async fn recv_close(client: &mut Client) -> Option<u16> {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("no close within timeout");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Send hello and return the broker's reply.
pub async fn hello(client: &mut Client, auth: Value, subs: &[&str]) -> Value {
    send(
        client,
        json!({ "type": "hello", "id": 1, "version": "2", "auth": auth, "subs": subs }),
    )
    .await;
    recv(client).await
}

/// Poll until `check` holds or the timeout elapses.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
