//! Resource negotiation with sites.
//!
//! One round checks every site named in a job's resource spec (except the
//! server) concurrently. Any failure to get a clean answer from a site counts
//! as "no resources there"; the round itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fleet_core::config::SchedulerConfig;
use fleet_core::{Job, JobId, ResourceRequirement, SiteName, SERVER_SITE};
use fleet_eisenbahn::messages::{
    CancelResourceRequest, CheckResourceRequest, ResourceReply, ReturnCode,
};
use fleet_eisenbahn::{EisenbahnError, Message, SiteRequester};

/// Outcome of a resource check at one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteCheckResult {
    pub ok: bool,
    /// Reservation token, present only when the site granted resources.
    pub token: Option<String>,
}

impl SiteCheckResult {
    pub fn granted(token: Option<String>) -> Self {
        Self { ok: true, token }
    }

    pub fn failed() -> Self {
        Self {
            ok: false,
            token: None,
        }
    }
}

/// One negotiation round: exactly one entry per negotiated site.
pub type CheckResults = BTreeMap<SiteName, SiteCheckResult>;

/// What happened when releasing the reservations of a rejected job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Number of cancellation requests sent.
    pub attempted: usize,
    /// Sites whose cancellation was not acknowledged.
    pub failed: Vec<SiteName>,
}

impl RollbackSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends check and cancel requests to sites through a [`SiteRequester`].
pub struct ResourceNegotiator {
    requester: Arc<dyn SiteRequester>,
    timeout: Duration,
    check_topic: String,
    cancel_topic: String,
}

impl ResourceNegotiator {
    pub fn new(requester: Arc<dyn SiteRequester>, config: &SchedulerConfig) -> Self {
        Self {
            requester,
            timeout: config.client_req_timeout(),
            check_topic: config.check_resource_topic.clone(),
            cancel_topic: config.cancel_resource_topic.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask every negotiated site of `job` to check and reserve its share.
    pub async fn check_resources(&self, job: &Job) -> CheckResults {
        let checks = job.negotiated_sites().map(|(site, requirement)| async move {
            let result = self.check_site(job.id(), site, requirement).await;
            (site.clone(), result)
        });

        let results: CheckResults = join_all(checks).await.into_iter().collect();
        debug!(
            job_id = %job.id(),
            sites = results.len(),
            granted = results.values().filter(|r| r.ok).count(),
            "resource check round finished"
        );
        results
    }

    async fn check_site(
        &self,
        job_id: &JobId,
        site: &str,
        requirement: &ResourceRequirement,
    ) -> SiteCheckResult {
        let body = CheckResourceRequest {
            job_id: job_id.clone(),
            resource_spec: requirement.clone(),
        };

        match self.request(site, &self.check_topic, &body).await {
            Ok(reply) if reply.is_granted() => SiteCheckResult::granted(reply.token),
            Ok(reply) => {
                debug!(
                    job_id = %job_id,
                    site = %site,
                    return_code = ?reply.return_code,
                    "site did not grant resources"
                );
                SiteCheckResult::failed()
            }
            Err(e) => {
                debug!(job_id = %job_id, site = %site, error = %e, "resource check failed");
                SiteCheckResult::failed()
            }
        }
    }

    /// Release every reservation granted in `results`.
    ///
    /// Delivery failures are logged and reported in the summary, never raised.
    pub async fn cancel_resources(&self, job: &Job, results: &CheckResults) -> RollbackSummary {
        let cancels = results
            .iter()
            .filter(|(site, result)| result.ok && site.as_str() != SERVER_SITE)
            .map(|(site, result)| async move {
                let body = CancelResourceRequest {
                    job_id: job.id().clone(),
                    resource_spec: job
                        .requirement_for(site)
                        .cloned()
                        .unwrap_or(ResourceRequirement::Null),
                    token: result.token.clone(),
                };
                let outcome = self.request(site, &self.cancel_topic, &body).await;
                (site, outcome)
            });

        let outcomes = join_all(cancels).await;
        let mut summary = RollbackSummary {
            attempted: outcomes.len(),
            failed: Vec::new(),
        };

        for (site, outcome) in outcomes {
            match outcome {
                Ok(reply) if reply.return_code == ReturnCode::Ok => {
                    debug!(job_id = %job.id(), site = %site, "reservation released");
                }
                Ok(reply) => {
                    warn!(
                        job_id = %job.id(),
                        site = %site,
                        return_code = ?reply.return_code,
                        "site refused resource cancellation"
                    );
                    summary.failed.push(site.clone());
                }
                Err(e) => {
                    warn!(job_id = %job.id(), site = %site, error = %e, "resource cancellation not delivered");
                    summary.failed.push(site.clone());
                }
            }
        }
        summary
    }

    /// Send one request to one site and decode its reply.
    async fn request<T: Serialize>(
        &self,
        site: &str,
        topic: &str,
        body: &T,
    ) -> Result<ResourceReply, EisenbahnError> {
        let msg = Message::new(topic, body)?;
        let targets = [site.to_string()];

        let mut responses = tokio::time::timeout(
            self.timeout,
            self.requester.send_to_sites(&targets, msg, self.timeout),
        )
        .await
        .map_err(|_| EisenbahnError::Timeout(self.timeout))?;

        let reply = responses
            .remove(site)
            .ok_or_else(|| EisenbahnError::Transport(format!("no response from site '{site}'")))??;
        Ok(reply.decode()?)
    }
}
