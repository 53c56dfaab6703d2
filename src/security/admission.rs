//! Connection admission control.
//!
//! # Responsibilities
//! - Enforce the global cap on connections, taken when a socket is accepted
//! - Enforce the per-user cap once an identity is known
//! - Keep counters exact: a rejected admission changes nothing
//!
//! Both counters live behind one mutex so that a check and its increment
//! are a single step.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AdmissionError;
use crate::lock;
use crate::observability::metrics;
use crate::session::SessionId;

#[derive(Debug, Default)]
struct Counters {
    total: usize,
    per_user: HashMap<String, usize>,
}

/// Global and per-user session counters.
#[derive(Debug)]
pub struct AdmissionController {
    max_total: Option<usize>,
    max_per_user: Option<usize>,
    index: bool,
    counters: Mutex<Counters>,
}

impl AdmissionController {
    /// `index` enables per-user accounting; `max_per_user` only applies with it.
    pub fn new(max_total: Option<usize>, max_per_user: Option<usize>, index: bool) -> Self {
        Self {
            max_total,
            max_per_user,
            index,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Take a global slot for `session`, or reject without touching any counter.
    pub fn try_admit(&self, session: SessionId) -> Result<(), AdmissionError> {
        let mut counters = lock(&self.counters);

        if let Some(limit) = self.max_total {
            if counters.total >= limit {
                let err = AdmissionError::GlobalLimit { limit };
                tracing::warn!(session_id = %session, limit, "Global connection limit reached");
                metrics::record_admission_rejected(&err);
                return Err(err);
            }
        }

        counters.total += 1;
        metrics::record_active_sessions(counters.total);
        tracing::trace!(session_id = %session, active = counters.total, "Session admitted");
        Ok(())
    }

    /// Count `session` against `user`.
    ///
    /// Returns `Ok(false)` when users are not indexed and nothing was taken.
    pub fn try_admit_user(&self, session: SessionId, user: &str) -> Result<bool, AdmissionError> {
        if !self.index {
            return Ok(false);
        }
        let mut counters = lock(&self.counters);

        if let Some(limit) = self.max_per_user {
            let current = counters.per_user.get(user).copied().unwrap_or(0);
            if current >= limit {
                let err = AdmissionError::UserLimit {
                    user: user.to_string(),
                    limit,
                };
                tracing::warn!(session_id = %session, user = %user, limit, "Per-user connection limit reached");
                metrics::record_admission_rejected(&err);
                return Err(err);
            }
        }

        *counters.per_user.entry(user.to_string()).or_insert(0) += 1;
        Ok(true)
    }

    /// Give back the global slot taken by `try_admit`.
    pub fn release(&self, session: SessionId) {
        let mut counters = lock(&self.counters);
        counters.total = counters.total.saturating_sub(1);
        metrics::record_active_sessions(counters.total);
        tracing::trace!(session_id = %session, active = counters.total, "Session released");
    }

    /// Give back the user slot taken by `try_admit_user`.
    pub fn release_user(&self, session: SessionId, user: &str) {
        let mut counters = lock(&self.counters);
        if let Some(count) = counters.per_user.get_mut(user) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counters.per_user.remove(user);
            }
        }
        tracing::trace!(session_id = %session, user = %user, "User slot released");
    }

    pub fn active(&self) -> usize {
        lock(&self.counters).total
    }

    /// Active sessions for `user`. Always zero without indexing.
    pub fn user_count(&self, user: &str) -> usize {
        lock(&self.counters).per_user.get(user).copied().unwrap_or(0)
    }

    /// Number of users with at least one active session.
    pub fn tracked_users(&self) -> usize {
        lock(&self.counters).per_user.len()
    }
}
