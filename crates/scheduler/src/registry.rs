//! Set of admitted jobs, bounded by `max_jobs`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use fleet_core::{Job, JobId, TerminalState};
use fleet_eisenbahn::events::JobTerminated;

/// Receives terminal job events.
pub trait TerminalEventHandler: Send + Sync {
    /// Returns true if the event freed an admission slot.
    fn handle_event(&self, event: &JobTerminated) -> bool;
}

#[derive(Debug, Clone)]
pub struct AdmittedJob {
    pub job: Job,
    pub admitted_at: DateTime<Utc>,
}

/// Jobs currently holding an admission slot.
///
/// Shared between the scheduling path and the event listener; all access
/// goes through an internal lock.
#[derive(Debug)]
pub struct SchedulerRegistry {
    max_jobs: usize,
    admitted: RwLock<HashMap<JobId, AdmittedJob>>,
}

impl SchedulerRegistry {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs,
            admitted: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, AdmittedJob>> {
        self.admitted.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, AdmittedJob>> {
        self.admitted.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.max_jobs
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.read().contains_key(job_id)
    }

    /// Admit `job`. Refuses (returns false) when the registry is full or the
    /// job already holds a slot.
    pub fn add(&self, job: &Job) -> bool {
        let mut admitted = self.write();
        if admitted.contains_key(job.id()) || admitted.len() >= self.max_jobs {
            return false;
        }
        admitted.insert(
            job.id().clone(),
            AdmittedJob {
                job: job.clone(),
                admitted_at: Utc::now(),
            },
        );
        debug!(job_id = %job.id(), count = admitted.len(), max_jobs = self.max_jobs, "job registered");
        true
    }

    /// Release the slot held by `job_id`. Unknown ids are ignored.
    pub fn remove(&self, job_id: &JobId) -> bool {
        let removed = self.write().remove(job_id).is_some();
        if removed {
            debug!(job_id = %job_id, "job unregistered");
        }
        removed
    }

    /// Admitted job ids, sorted.
    pub fn admitted(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, job_id: &JobId) -> Option<AdmittedJob> {
        self.read().get(job_id).cloned()
    }
}

impl TerminalEventHandler for SchedulerRegistry {
    fn handle_event(&self, event: &JobTerminated) -> bool {
        let removed = match event.state {
            TerminalState::Completed | TerminalState::Aborted | TerminalState::Canceled => {
                self.remove(&event.job_id)
            }
        };
        info!(job_id = %event.job_id, state = %event.state, removed, "job terminated");
        removed
    }
}
