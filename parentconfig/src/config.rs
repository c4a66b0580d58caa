use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Listener and admin listener share {0}")]
    ListenerConflict(String),

    #[error("Empty topology file path")]
    EmptyTopologyPath,

    #[error("Empty tool name")]
    EmptyToolName,
}

/// Where topology snapshots are loaded from on every request.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum TopologySourceConfig {
    /// A YAML or JSON snapshot on disk, chosen by file extension.
    Filesystem { path: PathBuf },
    /// An HTTP endpoint serving the snapshot as JSON.
    ControlPlane { url: Url },
}

/// Fallbacks for the header comment when the `global` parameters are not set.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HeaderConfig {
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default)]
    pub tool_url: String,
}

fn default_tool_name() -> String {
    "Traffic Ops".into()
}

impl Default for HeaderConfig {
    fn default() -> Self {
        HeaderConfig {
            tool_name: default_tool_name(),
            tool_url: String::new(),
        }
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3000,
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

/// Parent config service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for config file requests
    #[serde(default = "default_listener")]
    pub listener: Listener,
    /// Listener for health and readiness checks
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    pub topology_source: TopologySourceConfig,
    #[serde(default)]
    pub header: HeaderConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        if self.listener.address() == self.admin_listener.address() {
            return Err(ValidationError::ListenerConflict(self.listener.address()));
        }

        if let TopologySourceConfig::Filesystem { path } = &self.topology_source {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::EmptyTopologyPath);
            }
        }

        if self.header.tool_name.is_empty() {
            return Err(ValidationError::EmptyToolName);
        }
        Ok(())
    }
}
