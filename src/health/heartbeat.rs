//! Session liveness probing.
//!
//! # Responsibilities
//! - Periodically probe active sessions with `{type:"ping"}`
//! - Close sessions that stayed silent past `interval + timeout`
//!
//! Any inbound frame counts as activity, so clients answering pings (or
//! just talking) stay alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HeartbeatConfig;
use crate::error::{CloseReason, ProtocolError};
use crate::lifecycle::SessionRegistry;
use crate::observability::metrics;
use crate::protocol::ServerMessage;

/// Result of one sweep over the active sessions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub expired: usize,
}

pub struct HeartbeatMonitor {
    registry: Arc<SessionRegistry>,
    interval: Duration,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<SessionRegistry>, config: &HeartbeatConfig) -> Self {
        Self {
            registry,
            interval: config.interval(),
            timeout: config.timeout(),
        }
    }

    /// Silence after which a session is closed.
    pub fn deadline(&self) -> Duration {
        self.interval + self.timeout
    }

    /// Tick every interval until the registry's stopped flag changes.
    pub async fn run(self, mut stopped: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Heartbeat monitor starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(Instant::now());
                    tracing::trace!(probed = report.probed, expired = report.expired, "Heartbeat sweep");
                }
                _ = stopped.changed() => {
                    tracing::info!("Heartbeat monitor received stop signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe or expire every active session as of `now`.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let deadline = self.deadline();
        let mut report = SweepReport::default();

        for session in self.registry.active_sessions() {
            let silent = now.saturating_duration_since(session.last_activity());
            if silent > deadline {
                tracing::info!(
                    session_id = %session.id(),
                    silent_ms = silent.as_millis() as u64,
                    "Heartbeat expired"
                );
                if self
                    .registry
                    .close_session(&session, CloseReason::Protocol(ProtocolError::HeartbeatTimeout))
                {
                    metrics::record_heartbeat_expired();
                    report.expired += 1;
                }
                continue;
            }

            match session.send(&ServerMessage::Ping) {
                Ok(()) => report.probed += 1,
                Err(e) => tracing::debug!(session_id = %session.id(), error = %e, "Ping not queued"),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, Toggle};
    use crate::session::{Handshake, SessionState};

    fn setup() -> (Arc<SessionRegistry>, HeartbeatMonitor) {
        let config = BrokerConfig {
            auth: Toggle::Switch(false),
            ..BrokerConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new(&config));
        registry.start();
        let monitor = HeartbeatMonitor::new(registry.clone(), &HeartbeatConfig::default());
        (registry, monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_session_survives_until_deadline() {
        let (registry, monitor) = setup();
        let (session, mut rx) = registry.accept(Handshake::default()).unwrap();
        registry.subscriptions().subscribe(&session, "/t").unwrap();

        time::advance(Duration::from_millis(19_999)).await;
        assert_eq!(monitor.sweep(Instant::now()), SweepReport { probed: 1, expired: 0 });
        assert!(session.is_active());
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"type":"ping"}"#);

        time::advance(Duration::from_millis(2)).await;
        assert_eq!(monitor.sweep(Instant::now()), SweepReport { probed: 0, expired: 1 });
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(
            session.close_reason(),
            Some(CloseReason::Protocol(ProtocolError::HeartbeatTimeout))
        );
        assert_eq!(registry.subscriptions().topic_count(), 0);
        assert_eq!(registry.admission().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_clock() {
        let (registry, monitor) = setup();
        let (session, _rx) = registry.accept(Handshake::default()).unwrap();

        time::advance(Duration::from_millis(15_000)).await;
        session.touch();
        time::advance(Duration::from_millis(15_000)).await;

        assert_eq!(monitor.sweep(Instant::now()).expired, 0);
        assert!(session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_expires_silent_sessions() {
        let (registry, monitor) = setup();
        let (session, _rx) = registry.accept(Handshake::default()).unwrap();
        let task = tokio::spawn(monitor.run(registry.watch_stopped()));

        // Ticks at 15s (probe) and 30s (expire).
        time::sleep(Duration::from_millis(30_001)).await;
        assert_eq!(session.state(), SessionState::Closing);

        registry.stop().await.ok();
        task.await.unwrap();
    }
}
