use tracing::{debug, info, warn};

use fleet_core::Job;

use crate::evaluator::{self, AdmissionDecision, DispatchPlan};
use crate::negotiator::CheckResults;

use super::core::Scheduler;

/// Result of one `schedule_job` call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Admitted { job: Job, dispatch: DispatchPlan },
    NoneAdmissible,
}

impl ScheduleOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ScheduleOutcome::Admitted { .. })
    }
}

impl Scheduler {
    /// Admit the first admissible job of `candidates`, in the given order.
    ///
    /// Every rejected candidate has its granted reservations released before
    /// the next one is tried. Calls are serialized; when the registry is full
    /// no site is contacted at all.
    pub async fn schedule_job(&self, candidates: &[Job]) -> ScheduleOutcome {
        let _guard = self.in_flight.lock().await;
        self.record(|m| m.scheduling_rounds += 1);

        if self.registry.is_full() {
            debug!(
                admitted = self.registry.count(),
                max_jobs = self.registry.max_jobs(),
                "at capacity, skipping scheduling pass"
            );
            self.record(|m| m.capacity_skips += 1);
            return ScheduleOutcome::NoneAdmissible;
        }

        for job in candidates {
            if let Err(e) = job.validate() {
                warn!(job_id = %job.id(), error = %e, "skipping invalid candidate");
                self.record(|m| m.record_rejection("invalid_job"));
                continue;
            }
            if self.registry.contains(job.id()) {
                debug!(job_id = %job.id(), "candidate already admitted");
                continue;
            }

            self.record(|m| m.candidates_tried += 1);
            let results = self.negotiator.check_resources(job).await;

            match evaluator::evaluate(job, &results) {
                AdmissionDecision::Admit(dispatch) => {
                    if self.registry.add(job) {
                        info!(
                            job_id = %job.id(),
                            sites = dispatch.len(),
                            admitted = self.registry.count(),
                            "job admitted"
                        );
                        self.record(|m| m.record_admission());
                        return ScheduleOutcome::Admitted {
                            job: job.clone(),
                            dispatch,
                        };
                    }

                    warn!(job_id = %job.id(), "registry full after negotiation, releasing reservations");
                    self.record(|m| m.record_rejection("capacity_exhausted"));
                    self.rollback(job, &results).await;
                    return ScheduleOutcome::NoneAdmissible;
                }
                AdmissionDecision::Reject { reason, rollback } => {
                    info!(job_id = %job.id(), reason = %reason, "candidate rejected");
                    self.record(|m| m.record_rejection(reason.label()));
                    if rollback {
                        self.rollback(job, &results).await;
                    }
                }
            }
        }

        ScheduleOutcome::NoneAdmissible
    }

    async fn rollback(&self, job: &Job, results: &CheckResults) {
        let summary = self.negotiator.cancel_resources(job, results).await;
        if !summary.is_clean() {
            warn!(
                job_id = %job.id(),
                failed = ?summary.failed,
                "some reservations may still be held"
            );
        }
        self.record(|m| m.record_rollback(summary.attempted, summary.failed.len()));
    }
}
