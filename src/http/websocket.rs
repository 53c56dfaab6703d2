//! WebSocket transport.
//!
//! # Responsibilities
//! - Complete the upgrade and create the session
//! - Run one writer task (outbox → socket) and one reader loop per socket
//! - Hand inbound text frames to the dispatcher
//!
//! # Data Flow
//! ```text
//! socket ──read──► touch + Dispatcher::handle_text ──► replies → outbox
//! outbox ──pump──► socket (chunked, close frame last)
//! ```
//!
//! # Design Decisions
//! - The reader stops as soon as the session starts closing, so a close
//!   from any source (heartbeat, shutdown, host) ends the socket
//! - Protocol-level ping/pong counts as activity; axum answers pings itself

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{future, SinkExt, StreamExt};

use crate::broker::Broker;
use crate::error::{CloseReason, ProtocolError};
use crate::security::filter_headers;
use crate::session::{pump, Flow, Frame, Handshake};

/// Upgrade handler for the socket endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
) -> Response {
    if broker.is_stopped() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is stopped").into_response();
    }

    let handshake = Handshake {
        headers: filter_headers(&headers, &broker.config().headers),
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, broker, handshake))
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })),
    }
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>, handshake: Handshake) {
    let (sender, mut receiver) = socket.split();
    let mut sink = sender.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));

    let (session, outbox) = match broker.registry().accept(handshake) {
        Ok(accepted) => accepted,
        Err(e) => {
            let reason = CloseReason::from(e);
            tracing::info!(reason = %reason, "Connection refused");
            let frame = Frame::Close {
                code: reason.close_code(),
                reason: reason.to_string(),
            };
            let _ = sink.send(frame).await;
            let _ = sink.close().await;
            return;
        }
    };

    let registry = broker.registry().clone();
    let dispatcher = broker.dispatcher().clone();
    let max_chunk_chars = broker.config().payload.max_chunk_chars;
    let writer = tokio::spawn(pump(session.clone(), outbox, sink, max_chunk_chars));

    let reason = loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            _ = session.closing() => break None,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                session.touch();
                if let Flow::Close(reason) = dispatcher.handle_text(&session, text.as_str()).await {
                    break Some(reason);
                }
            }
            Some(Ok(Message::Binary(_))) => {
                session.touch();
                break Some(CloseReason::Protocol(ProtocolError::Malformed(
                    "binary frames are not supported".into(),
                )));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => session.touch(),
            Some(Ok(Message::Close(_))) | None => break Some(CloseReason::Disconnected),
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Socket read failed");
                break Some(CloseReason::Disconnected);
            }
        }
    };

    if let Some(reason) = reason {
        registry.close_session(&session, reason);
    }
    if let Err(e) = writer.await {
        tracing::error!(session_id = %session.id(), error = %e, "Socket writer task failed");
    }
    tracing::debug!(session_id = %session.id(), "Socket finished");
}
