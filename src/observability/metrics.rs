//! Metrics collection and exposition.
//!
//! # Metrics
//! - `broker_sessions_opened_total` (counter): accepted connections
//! - `broker_sessions_closed_total` (counter): closes by `reason`
//! - `broker_active_sessions` (gauge): sessions holding an admission slot
//! - `broker_admission_rejected_total` (counter): rejections by `scope`
//! - `broker_deliveries_total` (counter): per-recipient deliveries by `kind`, `outcome`
//! - `broker_heartbeat_expired_total` (counter): sessions closed for silence
//! - `broker_auth_total` (counter): auth endpoint and handshake results by `outcome`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and serves its own listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::AdmissionError;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_session_opened() {
    metrics::counter!("broker_sessions_opened_total").increment(1);
}

pub fn record_session_closed(reason: &'static str) {
    metrics::counter!("broker_sessions_closed_total", "reason" => reason).increment(1);
}

pub fn record_active_sessions(count: usize) {
    metrics::gauge!("broker_active_sessions").set(count as f64);
}

pub fn record_admission_rejected(err: &AdmissionError) {
    let scope = match err {
        AdmissionError::GlobalLimit { .. } => "global",
        AdmissionError::UserLimit { .. } => "user",
    };
    metrics::counter!("broker_admission_rejected_total", "scope" => scope).increment(1);
}

pub fn record_delivery(kind: &'static str, outcome: &'static str) {
    metrics::counter!("broker_deliveries_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_heartbeat_expired() {
    metrics::counter!("broker_heartbeat_expired_total").increment(1);
}

pub fn record_auth(outcome: &'static str) {
    metrics::counter!("broker_auth_total", "outcome" => outcome).increment(1);
}
