use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Messaging layout for the scheduler and its sites.
///
/// Parsed from `eisenbahn.toml` with support for environment variable overrides.
/// Names the endpoint every site agent binds its ROUTER socket on, and the
/// endpoint job lifecycle events are published on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EisenbahnConfig {
    /// Job lifecycle event stream.
    #[serde(default)]
    pub events: EventsConfig,

    /// Site agents, keyed by site name.
    #[serde(default)]
    pub sites: HashMap<String, SiteConfig>,

    /// Default transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

// ── Section configs ─────────────────────────────────────────────────

/// Events section: where `JobTerminated` events are published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// PUB endpoint bound by the job runner; the scheduler connects a SUB to it.
    #[serde(default = "default_events_endpoint")]
    pub endpoint: String,
}

fn default_events_endpoint() -> String {
    "ipc:///tmp/fleet/job-events.sock".into()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_events_endpoint(),
        }
    }
}

/// A single site agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// The endpoint where the site agent binds its ROUTER socket.
    pub endpoint: String,
}

/// Transport defaults section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport every endpoint must use: "ipc" or "tcp".
    #[serde(default = "default_transport_kind")]
    pub kind: String,
}

fn default_transport_kind() -> String {
    "ipc".into()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
        }
    }
}
