//! Service Settings
//!
//! Runtime configuration of the configuration manager, read from a TOML
//! (or JSON) file. Every field has a default so an empty file is valid.

use crate::credentials::{Uid, DEFAULT_BACKEND_PREFIX};
use crate::error::{ConfigMgrError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Directory holding persistent profiles; `None` disables persistence
    pub state_dir: Option<PathBuf>,
    /// Unix socket the service listens on
    pub socket_path: PathBuf,
    /// User id the VPN backend client processes run as
    ///
    /// Defaults to 0, so root is trusted as the backend until a dedicated
    /// account is configured. See `configmgr.sample.toml`.
    pub backend_uid: Uid,
    /// Well-known name prefix of backend client processes
    pub backend_name_prefix: String,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Replace persistent files through a temporary file and rename
    pub atomic_writes: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            socket_path: PathBuf::from("/run/openvpn3/configmgr.sock"),
            backend_uid: 0,
            backend_name_prefix: DEFAULT_BACKEND_PREFIX.to_string(),
            log_level: "info".to_string(),
            atomic_writes: true,
        }
    }
}

impl ServiceSettings {
    /// Load from a file, picking the format from the extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content)?,
            _ => Self::from_toml(&content)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Parse TOML settings
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigMgrError::Parse(e.to_string()))
    }

    /// Parse JSON settings
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| ConfigMgrError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Check settings for values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigMgrError::InvalidArgument("socket_path cannot be empty".into()));
        }
        if self.backend_name_prefix.is_empty() {
            return Err(ConfigMgrError::InvalidArgument(
                "backend_name_prefix cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
