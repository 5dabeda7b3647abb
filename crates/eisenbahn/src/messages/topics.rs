//! Topic constants for request routing and PUB/SUB filtering.
//!
//! Topics follow the pattern `eisenbahn.<domain>.<event>`.

// ── Request/reply topics ──────────────────────────────────────────────────

/// Ask a site to check and reserve resources for a job.
pub const CHECK_RESOURCE: &str = "eisenbahn.resource.check";

/// Ask a site to release a reservation made by an earlier check.
pub const CANCEL_RESOURCE: &str = "eisenbahn.resource.cancel";

// ── Event topics ──────────────────────────────────────────────────────────

/// Fired when a job reaches a terminal state (completed, aborted, canceled).
pub const JOB_TERMINATED: &str = "eisenbahn.job.terminated";
