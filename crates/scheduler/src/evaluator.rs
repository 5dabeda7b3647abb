//! Admission decision for one negotiated candidate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use fleet_core::{Job, ResourceRequirement, SiteName};

use crate::negotiator::CheckResults;

/// What a site receives when its share of an admitted job is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchInfo {
    pub resource_requirements: ResourceRequirement,
    pub token: Option<String>,
}

/// Dispatch info for every site that granted resources.
pub type DispatchPlan = BTreeMap<SiteName, DispatchInfo>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No site was negotiated at all.
    NoResults,
    /// Fewer sites answered than the job's quorum.
    TooFewResponses { responded: usize, min_sites: usize },
    /// Fewer sites granted resources than the job's quorum.
    QuorumNotMet { granted: usize, min_sites: usize },
    /// At least one mandatory site did not grant resources.
    RequiredSitesMissing { missing: Vec<SiteName> },
}

impl RejectReason {
    /// Stable label used as a metrics key.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::NoResults => "no_results",
            RejectReason::TooFewResponses { .. } => "too_few_responses",
            RejectReason::QuorumNotMet { .. } => "quorum_not_met",
            RejectReason::RequiredSitesMissing { .. } => "required_sites_missing",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoResults => write!(f, "no sites to negotiate with"),
            RejectReason::TooFewResponses {
                responded,
                min_sites,
            } => write!(f, "{responded} site results, {min_sites} required"),
            RejectReason::QuorumNotMet { granted, min_sites } => {
                write!(f, "{granted} sites granted resources, {min_sites} required")
            }
            RejectReason::RequiredSitesMissing { missing } => {
                write!(f, "required sites without resources: {}", missing.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Admit(DispatchPlan),
    /// `rollback` is set when granted reservations must be released.
    Reject { reason: RejectReason, rollback: bool },
}

impl AdmissionDecision {
    fn reject(reason: RejectReason) -> Self {
        let rollback = reason != RejectReason::NoResults;
        AdmissionDecision::Reject { reason, rollback }
    }
}

/// Decide whether `job` can run given the results of its negotiation round.
pub fn evaluate(job: &Job, results: &CheckResults) -> AdmissionDecision {
    if results.is_empty() {
        return AdmissionDecision::reject(RejectReason::NoResults);
    }

    if results.len() < job.min_sites() {
        return AdmissionDecision::reject(RejectReason::TooFewResponses {
            responded: results.len(),
            min_sites: job.min_sites(),
        });
    }

    let plan: DispatchPlan = results
        .iter()
        .filter(|(_, result)| result.ok)
        .map(|(site, result)| {
            let info = DispatchInfo {
                resource_requirements: job
                    .requirement_for(site)
                    .cloned()
                    .unwrap_or(ResourceRequirement::Null),
                token: result.token.clone(),
            };
            (site.clone(), info)
        })
        .collect();

    if plan.len() < job.min_sites() {
        return AdmissionDecision::reject(RejectReason::QuorumNotMet {
            granted: plan.len(),
            min_sites: job.min_sites(),
        });
    }

    let missing: Vec<SiteName> = job
        .required_sites()
        .iter()
        .filter(|site| !plan.contains_key(site.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return AdmissionDecision::reject(RejectReason::RequiredSitesMissing { missing });
    }

    AdmissionDecision::Admit(plan)
}
