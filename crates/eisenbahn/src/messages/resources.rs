//! Resource negotiation payloads exchanged between the scheduler and sites.

use fleet_core::{JobId, ResourceRequirement};
use serde::{Deserialize, Serialize};

/// Status code of a site reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnCode {
    Ok,
    /// The site failed while handling the request.
    ExecutionException,
    /// The site is up but not accepting work.
    ServiceUnavailable,
    /// The request payload could not be interpreted.
    InvalidRequest,
    Timeout,
}

/// Sent on [`CHECK_RESOURCE`](crate::topics::CHECK_RESOURCE): check whether the
/// site can host its share of a job and, if so, reserve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResourceRequest {
    pub job_id: JobId,
    pub resource_spec: ResourceRequirement,
}

/// Sent on [`CANCEL_RESOURCE`](crate::topics::CANCEL_RESOURCE): release the
/// reservation identified by `token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResourceRequest {
    pub job_id: JobId,
    pub resource_spec: ResourceRequirement,
    pub token: Option<String>,
}

/// Reply to both check and cancel requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReply {
    pub return_code: ReturnCode,
    /// Whether the site granted the requested resources (checks only).
    #[serde(default)]
    pub approved: bool,
    /// Reservation token for a granted check.
    #[serde(default)]
    pub token: Option<String>,
}

impl ResourceReply {
    /// Resources reserved under `token`.
    pub fn granted(token: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::Ok,
            approved: true,
            token: Some(token.into()),
        }
    }

    /// Request handled, resources not available.
    pub fn denied() -> Self {
        Self {
            return_code: ReturnCode::Ok,
            approved: false,
            token: None,
        }
    }

    /// Request handled successfully with nothing to report (cancellations).
    pub fn ok() -> Self {
        Self::denied()
    }

    pub fn error(code: ReturnCode) -> Self {
        Self {
            return_code: code,
            approved: false,
            token: None,
        }
    }

    /// True only for an OK reply that approved the request.
    pub fn is_granted(&self) -> bool {
        self.return_code == ReturnCode::Ok && self.approved
    }
}
