//! Job admission scheduler.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, builder, and accessor methods
//! - `scheduling`: the single-flight `schedule_job` pass over candidates

mod core;
mod scheduling;
#[cfg(test)]
mod tests;

pub use self::core::{Scheduler, SchedulerBuilder};
pub use self::scheduling::ScheduleOutcome;
