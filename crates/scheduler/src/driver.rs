//! Polling loop that feeds submitted jobs from the artifact store to the
//! scheduler and records admissions back into it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use fleet_core::{Config, Job, JobId};
use fleet_eisenbahn::events::JobTerminated;
use fleet_storage::{Meta, StorageError, StorageSpec};

use crate::error::SchedulerError;
use crate::evaluator::DispatchPlan;
use crate::registry::TerminalEventHandler;
use crate::scheduler::{ScheduleOutcome, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Dispatched,
    Finished,
}

/// Metadata stored with every submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub dispatch: Option<DispatchPlan>,
}

impl JobRecord {
    pub fn submitted(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::Submitted,
            submitted_at: Utc::now(),
            dispatch: None,
        }
    }

    pub fn to_meta(&self) -> Result<Meta, SchedulerError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(meta) => Ok(meta),
            // A struct always serializes to an object.
            other => Err(SchedulerError::Config(format!(
                "job record serialized to non-object {other}"
            ))),
        }
    }

    pub fn from_meta(meta: Meta) -> Result<Self, SchedulerError> {
        Ok(serde_json::from_value(serde_json::Value::Object(meta))?)
    }
}

pub struct SchedulingDriver {
    scheduler: Arc<Scheduler>,
    storage: Arc<dyn StorageSpec>,
    jobs_dir: String,
    poll_interval: Duration,
}

impl SchedulingDriver {
    pub fn new(
        scheduler: Arc<Scheduler>,
        storage: Arc<dyn StorageSpec>,
        jobs_dir: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            storage,
            jobs_dir: jobs_dir.into(),
            poll_interval,
        }
    }

    pub fn from_config(
        scheduler: Arc<Scheduler>,
        storage: Arc<dyn StorageSpec>,
        config: &Config,
    ) -> Self {
        Self::new(
            scheduler,
            storage,
            config.storage.jobs_dir.clone(),
            config.scheduler.poll_interval(),
        )
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn job_uri(&self, job_id: &JobId) -> String {
        format!("{}/{}", self.jobs_dir.trim_end_matches('/'), job_id)
    }

    /// Store a validated job with status `Submitted`. Returns its URI.
    pub fn submit(&self, job: Job) -> Result<String, SchedulerError> {
        job.validate()?;
        let uri = self.job_uri(job.id());
        let data = serde_json::to_vec(&job)?;
        let record = JobRecord::submitted(job);
        self.storage
            .create_object(&uri, &data, &record.to_meta()?, false)?;
        info!(uri = %uri, "job submitted");
        Ok(uri)
    }

    /// Stored record of `job_id`.
    pub fn record(&self, job_id: &JobId) -> Result<JobRecord, SchedulerError> {
        let meta = self.storage.get_meta(&self.job_uri(job_id))?;
        JobRecord::from_meta(meta)
    }

    /// Submitted jobs in submission order, ties broken by job id.
    pub fn pending_jobs(&self) -> Result<Vec<JobRecord>, SchedulerError> {
        let uris = match self.storage.list_objects(&self.jobs_dir) {
            Ok(uris) => uris,
            Err(StorageError::DirectoryNotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pending: Vec<JobRecord> = uris
            .iter()
            .filter_map(|uri| {
                match self
                    .storage
                    .get_meta(uri)
                    .map_err(SchedulerError::from)
                    .and_then(JobRecord::from_meta)
                {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(uri = %uri, error = %e, "skipping malformed job record");
                        None
                    }
                }
            })
            .filter(|record| record.status == JobStatus::Submitted)
            .collect();

        pending.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.job.id().cmp(b.job.id()))
        });
        Ok(pending)
    }

    /// One scheduling pass. Returns the admitted job's id, if any.
    pub async fn run_once(&self) -> Result<Option<JobId>, SchedulerError> {
        let candidates: Vec<Job> = self
            .pending_jobs()?
            .into_iter()
            .map(|record| record.job)
            .collect();
        if candidates.is_empty() {
            debug!("no pending jobs");
            return Ok(None);
        }

        match self.scheduler.schedule_job(&candidates).await {
            ScheduleOutcome::Admitted { job, dispatch } => {
                // The job already holds a slot and site reservations here.
                if let Err(e) = self.mark_dispatched(job.id(), &dispatch) {
                    error!(
                        job_id = %job.id(),
                        dispatch = ?dispatch,
                        error = %e,
                        "admitted job not recorded; dispatch plan lost from store"
                    );
                    return Err(e);
                }
                info!(job_id = %job.id(), "job dispatched");
                Ok(Some(job.id().clone()))
            }
            ScheduleOutcome::NoneAdmissible => {
                debug!(candidates = candidates.len(), "no candidate admitted");
                Ok(None)
            }
        }
    }

    /// Call [`run_once`](Self::run_once) every poll interval until `shutdown` is notified.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let stop = shutdown.notified();
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(self.poll_interval);
        info!(interval = ?self.poll_interval, jobs_dir = %self.jobs_dir, "scheduling driver started");

        loop {
            tokio::select! {
                _ = &mut stop => {
                    info!("scheduling driver stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "scheduling pass failed");
                    }
                }
            }
        }
    }

    fn mark_dispatched(
        &self,
        job_id: &JobId,
        dispatch: &DispatchPlan,
    ) -> Result<(), SchedulerError> {
        let mut record = self.record(job_id)?;
        record.status = JobStatus::Dispatched;
        record.dispatch = Some(dispatch.clone());
        self.storage
            .update_meta(&self.job_uri(job_id), &record.to_meta()?, true)?;
        Ok(())
    }

    /// Mark a terminated job's record as finished.
    fn mark_finished(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        let mut record = self.record(job_id)?;
        record.status = JobStatus::Finished;
        self.storage
            .update_meta(&self.job_uri(job_id), &record.to_meta()?, true)?;
        Ok(())
    }
}

impl TerminalEventHandler for SchedulingDriver {
    /// Free the scheduler slot and mark the stored record finished.
    fn handle_event(&self, event: &JobTerminated) -> bool {
        let removed = self.scheduler.handle_event(event);
        match self.mark_finished(&event.job_id) {
            Ok(()) => debug!(job_id = %event.job_id, "job record finished"),
            Err(SchedulerError::Storage(StorageError::NotFound(_))) => {
                debug!(job_id = %event.job_id, "terminated job has no stored record");
            }
            Err(e) => warn!(job_id = %event.job_id, error = %e, "failed to update job record"),
        }
        removed
    }
}
