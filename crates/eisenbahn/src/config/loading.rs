use std::collections::HashMap;
use std::path::Path;

use crate::error::EisenbahnError;
use crate::transport::Transport;

use super::types::{EisenbahnConfig, EventsConfig, SiteConfig, TransportConfig};

impl EisenbahnConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, EisenbahnError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EisenbahnError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Single-host layout over IPC with no sites registered.
    pub fn local() -> Self {
        Self {
            events: EventsConfig::default(),
            sites: HashMap::new(),
            transport: TransportConfig::default(),
        }
    }

    /// Register a site endpoint, replacing any previous one.
    pub fn with_site(mut self, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.sites.insert(
            name.into(),
            SiteConfig {
                endpoint: endpoint.into(),
            },
        );
        self
    }

    /// Resolve the events endpoint to a [`Transport`].
    pub fn events_transport(&self) -> Result<Transport, EisenbahnError> {
        Transport::parse(&self.events.endpoint)
    }

    /// Resolve a named site's endpoint.
    pub fn site_transport(&self, name: &str) -> Result<Transport, EisenbahnError> {
        let site = self
            .sites
            .get(name)
            .ok_or_else(|| EisenbahnError::UnknownSite(name.to_string()))?;
        Transport::parse(&site.endpoint)
    }

    /// Resolve every configured site endpoint.
    pub fn site_transports(&self) -> Result<HashMap<String, Transport>, EisenbahnError> {
        self.sites
            .iter()
            .map(|(name, site)| Ok((name.clone(), Transport::parse(&site.endpoint)?)))
            .collect()
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `EISENBAHN_EVENTS_ENDPOINT` -> `events.endpoint`
    /// - `EISENBAHN_TRANSPORT_KIND` -> `transport.kind`
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("EISENBAHN_EVENTS_ENDPOINT") {
            self.events.endpoint = v;
        }
        if let Ok(v) = std::env::var("EISENBAHN_TRANSPORT_KIND") {
            self.transport.kind = v;
        }
    }
}
