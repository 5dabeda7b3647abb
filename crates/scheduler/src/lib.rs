//! Distributed job admission.
//!
//! The [`Scheduler`] picks the first admissible job from a candidate list by
//! negotiating resources with every participating site, rolling back partial
//! reservations of rejected candidates, and bounding the number of admitted
//! jobs. Terminal job events free admission slots again.

pub mod driver;
pub mod error;
pub mod evaluator;
pub mod listener;
pub mod metrics;
pub mod negotiator;
pub mod registry;
pub mod scheduler;
pub mod site;

pub use driver::{JobRecord, JobStatus, SchedulingDriver};
pub use error::SchedulerError;
pub use evaluator::{evaluate, AdmissionDecision, DispatchInfo, DispatchPlan, RejectReason};
pub use listener::spawn_event_listener;
pub use metrics::SchedulerMetrics;
pub use negotiator::{CheckResults, ResourceNegotiator, RollbackSummary, SiteCheckResult};
pub use registry::{AdmittedJob, SchedulerRegistry, TerminalEventHandler};
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerBuilder};
pub use site::SiteResourceManager;
