use fleet_core::SERVER_SITE;

use super::types::EisenbahnConfig;
use crate::error::EisenbahnError;
use crate::transport::Transport;

impl EisenbahnConfig {
    /// Validate the config: transport kind, site names, and endpoint syntax.
    pub fn validate(&self) -> Result<(), EisenbahnError> {
        self.validate_transport_kind()?;
        self.validate_endpoint("events", &self.events.endpoint)?;
        self.validate_sites()?;
        Ok(())
    }

    fn validate_transport_kind(&self) -> Result<(), EisenbahnError> {
        match self.transport.kind.as_str() {
            "ipc" | "tcp" => Ok(()),
            other => Err(EisenbahnError::Config(format!(
                "invalid transport kind '{other}', expected 'ipc' or 'tcp'"
            ))),
        }
    }

    /// The server never negotiates with itself, so it cannot be a site.
    fn validate_sites(&self) -> Result<(), EisenbahnError> {
        for (name, site) in &self.sites {
            if name.is_empty() || name == SERVER_SITE {
                return Err(EisenbahnError::Config(format!(
                    "'{name}' is not a valid site name"
                )));
            }
            self.validate_endpoint(&format!("site '{name}'"), &site.endpoint)?;
        }
        Ok(())
    }

    fn validate_endpoint(&self, owner: &str, endpoint: &str) -> Result<(), EisenbahnError> {
        let transport = Transport::parse(endpoint).map_err(|e| match e {
            EisenbahnError::Config(msg) => EisenbahnError::Config(format!("{owner}: {msg}")),
            other => other,
        })?;
        if transport.kind() != self.transport.kind {
            return Err(EisenbahnError::Config(format!(
                "{owner} endpoint '{endpoint}' does not use transport kind '{}'",
                self.transport.kind
            )));
        }
        Ok(())
    }
}
