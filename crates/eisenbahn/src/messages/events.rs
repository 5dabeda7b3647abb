//! Job lifecycle event payloads carried by [`Message`](crate::Message) envelopes.

use fleet_core::{JobId, TerminalState};
use serde::{Deserialize, Serialize};

/// Emitted when a job reaches a terminal state.
///
/// Published on [`JOB_TERMINATED`](crate::topics::JOB_TERMINATED). Duplicate
/// events, and events for jobs a given scheduler never admitted, are expected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTerminated {
    pub job_id: JobId,
    pub state: TerminalState,
}
