use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EisenbahnError;

/// Directory holding IPC sockets created via [`Transport::ipc`].
pub const IPC_DIR: &str = "/tmp/fleet";

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets.
    /// Holds the full socket path.
    Ipc(String),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create an IPC transport for a named socket under [`IPC_DIR`].
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(format!("{IPC_DIR}/{name}.sock"))
    }

    /// Create a TCP transport with the given host and port.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string like `ipc:///tmp/fleet/site-a.sock` or `tcp://host:port`.
    pub fn parse(endpoint: &str) -> Result<Self, EisenbahnError> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(EisenbahnError::Config(format!(
                    "ipc endpoint '{endpoint}' has no socket path"
                )));
            }
            return Ok(Self::Ipc(path.to_string()));
        }

        if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                EisenbahnError::Config(format!("tcp endpoint '{endpoint}' is missing a port"))
            })?;
            let port: u16 = port.parse().map_err(|_| {
                EisenbahnError::Config(format!("tcp endpoint '{endpoint}' has an invalid port"))
            })?;
            if host.is_empty() {
                return Err(EisenbahnError::Config(format!(
                    "tcp endpoint '{endpoint}' is missing a host"
                )));
            }
            return Ok(Self::tcp(host, port));
        }

        Err(EisenbahnError::Config(format!(
            "unsupported endpoint '{endpoint}', expected ipc:// or tcp://"
        )))
    }

    /// Short transport kind: "ipc" or "tcp".
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ipc(_) => "ipc",
            Self::Tcp { .. } => "tcp",
        }
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(path) => format!("ipc://{path}"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the parent directory exists.
    ///
    /// ZeroMQ requires the directory to exist before binding an IPC socket.
    /// This is a no-op for TCP transports.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(path) = self {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left over from a previous run.
    ///
    /// A `.sock` file left behind by a crashed process causes `EADDRINUSE`
    /// on the next bind. No-op for TCP transports or if the file doesn't exist.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(path) = self {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path = %path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}
