//! Outbox writer: drains a session's queue into its transport.
//!
//! # Data Flow
//! ```text
//! publish / broadcast / replies
//!     → Session::deliver (bounded mpsc, FIFO)
//!     → pump (one task per session)
//!     → chunk_frame (optional split)
//!     → transport sink
//! ```
//!
//! On close the queue is flushed before the close frame goes out, and the
//! session is told its transport has been released.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt};
use tokio::sync::watch;

use crate::error::TransportError;
use crate::protocol::chunk_frame;
use crate::session::handle::{OutboxReceiver, Session};
use crate::session::state::SessionState;

/// Transport-level frame produced by the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Drive `sink` from the session outbox until the session closes or the
/// transport fails.
pub async fn pump<S>(
    session: Arc<Session>,
    mut rx: OutboxReceiver,
    mut sink: S,
    max_chunk_chars: Option<usize>,
) where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    let mut state = session.watch_state();

    let outcome = loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write(&mut sink, &frame, max_chunk_chars).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
            _ = terminating(&mut state) => {
                break flush_and_close(&session, &mut rx, &mut sink, max_chunk_chars).await;
            }
        }
    };

    rx.close();
    let _ = sink.close().await;

    match &outcome {
        Ok(()) => tracing::trace!(session_id = %session.id(), "Transport released"),
        Err(e) => tracing::debug!(session_id = %session.id(), error = %e, "Transport released with error"),
    }
    session.mark_released(outcome);
}

/// Resolves once the session starts closing. Yields `()` so no watch guard
/// is held across the writer's awaits.
async fn terminating(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|s| s.is_terminating()).await;
}

async fn flush_and_close<S>(
    session: &Session,
    rx: &mut OutboxReceiver,
    sink: &mut S,
    max_chunk_chars: Option<usize>,
) -> Result<(), TransportError>
where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    while let Ok(frame) = rx.try_recv() {
        write(sink, &frame, max_chunk_chars).await?;
    }
    let (code, reason) = session.close_frame();
    sink.send(Frame::Close { code, reason })
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

async fn write<S>(sink: &mut S, frame: &str, max_chunk_chars: Option<usize>) -> Result<(), TransportError>
where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    for piece in chunk_frame(frame, max_chunk_chars) {
        sink.feed(Frame::Text(piece))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
    }
    sink.flush().await.map_err(|e| TransportError::Send(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloseReason;
    use crate::session::handle::Handshake;
    use std::convert::Infallible;
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<Frame>>>;

    fn capture() -> (Captured, impl Sink<Frame, Error = Infallible> + Unpin) {
        let frames: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = futures_util::sink::unfold(frames.clone(), |frames, frame: Frame| async move {
            frames.lock().unwrap().push(frame);
            Ok::<_, Infallible>(frames)
        });
        (frames, Box::pin(sink))
    }

    #[tokio::test]
    async fn flushes_queue_before_close_frame() {
        let (session, rx) = Session::new(Handshake::default(), 8);
        session.transition(SessionState::Active).unwrap();
        let (frames, sink) = capture();

        session.deliver(Arc::from("one")).unwrap();
        session.deliver(Arc::from("two")).unwrap();
        session.begin_close(CloseReason::ServerShutdown);

        pump(session.clone(), rx, sink, None).await;

        let frames = frames.lock().unwrap().clone();
        assert_eq!(
            frames,
            vec![
                Frame::Text("one".into()),
                Frame::Text("two".into()),
                Frame::Close { code: 1001, reason: "server shutting down".into() },
            ]
        );
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.closed().await, Ok(()));
    }

    #[tokio::test]
    async fn runs_as_a_spawned_task() {
        let (session, rx) = Session::new(Handshake::default(), 8);
        session.transition(SessionState::Active).unwrap();
        let (frames, sink) = capture();

        let writer = tokio::spawn(pump(session.clone(), rx, sink, None));
        session.deliver(Arc::from("queued")).unwrap();
        session.begin_close(CloseReason::Requested);
        writer.await.unwrap();

        let frames = frames.lock().unwrap().clone();
        assert_eq!(frames[0], Frame::Text("queued".into()));
        assert!(matches!(frames[1], Frame::Close { code: 1000, .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn splits_long_frames() {
        let (session, rx) = Session::new(Handshake::default(), 8);
        session.transition(SessionState::Active).unwrap();
        let (frames, sink) = capture();

        session.deliver(Arc::from("abcdefg")).unwrap();
        session.begin_close(CloseReason::Requested);
        pump(session, rx, sink, Some(3)).await;

        let frames = frames.lock().unwrap().clone();
        assert_eq!(frames[0], Frame::Text("+abc".into()));
        assert_eq!(frames[1], Frame::Text("+def".into()));
        assert_eq!(frames[2], Frame::Text("!g".into()));
    }

    #[tokio::test]
    async fn failing_transport_releases_session() {
        let (session, rx) = Session::new(Handshake::default(), 8);
        session.transition(SessionState::Active).unwrap();
        let sink = Box::pin(futures_util::sink::unfold((), |_, _frame: Frame| async move {
            Err::<(), _>("connection reset")
        }));

        session.deliver(Arc::from("lost")).unwrap();
        pump(session.clone(), rx, sink, None).await;

        // Still active until the reader notices, but later closes skip draining.
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.deliver(Arc::from("after")), Err(TransportError::Closed));
        session.begin_close(CloseReason::Disconnected);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            session.closed().await,
            Err(TransportError::Send("connection reset".into()))
        );
    }
}
