use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler counters, exposed as a serializable snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Calls to `schedule_job`.
    pub scheduling_rounds: u64,
    /// Rounds skipped because every admission slot was taken.
    pub capacity_skips: u64,
    /// Candidates negotiated with sites.
    pub candidates_tried: u64,
    pub jobs_admitted: u64,
    /// Rejected candidates by reason label.
    pub rejections: HashMap<String, u64>,
    /// Cancellation requests sent while rolling back reservations.
    pub rollbacks_sent: u64,
    /// Cancellation requests that were not acknowledged.
    pub rollback_failures: u64,
    /// Terminal events that freed a slot.
    pub jobs_released: u64,
    pub last_admission: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_admission(&mut self) {
        self.jobs_admitted += 1;
        self.last_admission = Some(Utc::now());
    }

    pub fn record_rejection(&mut self, reason: &str) {
        *self.rejections.entry(reason.to_string()).or_default() += 1;
    }

    pub fn record_rollback(&mut self, sent: usize, failed: usize) {
        self.rollbacks_sent += sent as u64;
        self.rollback_failures += failed as u64;
    }

    pub fn total_rejections(&self) -> u64 {
        self.rejections.values().sum()
    }
}
