use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Name of the pseudo-site representing the coordinating server.
///
/// The server is assumed to have unlimited local capacity, so it never takes
/// part in resource negotiation even when a job lists it in its resource spec.
pub const SERVER_SITE: &str = "server";

/// Identifier of a participating compute site.
pub type SiteName = String;

/// Opaque per-site resource requirement (e.g. `{"gpu": 2, "memory_gb": 16}`).
///
/// The scheduler never interprets it; only the site that receives it does.
pub type ResourceRequirement = serde_json::Value;

/// Unique identifier of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random job id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A job waiting for admission onto the fleet.
///
/// Jobs are immutable once handed to the scheduler: every field is read-only
/// and the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    /// Human-readable name (free-form, not interpreted).
    #[serde(default)]
    name: String,
    /// Per-site resource requirements, keyed by site name.
    #[serde(default)]
    resource_spec: BTreeMap<SiteName, ResourceRequirement>,
    /// Minimum number of sites that must grant resources.
    #[serde(default)]
    min_sites: usize,
    /// Sites whose participation is mandatory.
    #[serde(default)]
    required_sites: BTreeSet<SiteName>,
}

impl Job {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            resource_spec: BTreeMap::new(),
            min_sites: 0,
            required_sites: BTreeSet::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add (or replace) the resource requirement for one site.
    pub fn with_site(mut self, site: impl Into<SiteName>, requirement: ResourceRequirement) -> Self {
        self.resource_spec.insert(site.into(), requirement);
        self
    }

    pub fn with_min_sites(mut self, min_sites: usize) -> Self {
        self.min_sites = min_sites;
        self
    }

    /// Mark a site as mandatory. The site must also appear in the resource spec.
    pub fn with_required_site(mut self, site: impl Into<SiteName>) -> Self {
        self.required_sites.insert(site.into());
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_spec(&self) -> &BTreeMap<SiteName, ResourceRequirement> {
        &self.resource_spec
    }

    pub fn min_sites(&self) -> usize {
        self.min_sites
    }

    pub fn required_sites(&self) -> &BTreeSet<SiteName> {
        &self.required_sites
    }

    /// Requirement for a single site, if the job targets it.
    pub fn requirement_for(&self, site: &str) -> Option<&ResourceRequirement> {
        self.resource_spec.get(site)
    }

    /// Sites that take part in resource negotiation (everything except the server).
    pub fn negotiated_sites(&self) -> impl Iterator<Item = (&SiteName, &ResourceRequirement)> {
        self.resource_spec
            .iter()
            .filter(|(site, _)| site.as_str() != SERVER_SITE)
    }

    /// Check structural invariants: every required site must be in the resource spec.
    pub fn validate(&self) -> Result<(), CoreError> {
        let missing: Vec<&str> = self
            .required_sites
            .iter()
            .filter(|site| !self.resource_spec.contains_key(site.as_str()))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(CoreError::InvalidJob(format!(
                "job '{}' requires sites not present in its resource spec: {}",
                self.id,
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Terminal lifecycle state of a job. Receiving any of these frees the job's
/// admission slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Aborted,
    Canceled,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalState::Completed => write!(f, "completed"),
            TerminalState::Aborted => write!(f, "aborted"),
            TerminalState::Canceled => write!(f, "canceled"),
        }
    }
}
