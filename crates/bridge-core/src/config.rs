//! Bridge configuration
//!
//! Loaded from an optional TOML file; every field has a sensible default so
//! a bare `bridge-server` invocation works out of the box.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default localhost port for the TCP listener.
pub const DEFAULT_PORT: u16 = 57110;

/// Command restriction lists. Deny wins over allow; an empty allow list
/// means "everything not denied".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandRestrictions {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

/// Pairing/token discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// If set, the session token is exported to this file (mode 0600) so
    /// local clients can discover it without copy-pasting.
    pub export_token_path: Option<PathBuf>,
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// TCP listen port (always bound to 127.0.0.1).
    pub port: u16,

    /// Event ring buffer capacity (bounds subscription replay).
    pub event_capacity: usize,

    /// Trace ring buffer capacity.
    pub trace_capacity: usize,

    /// Command allow/deny lists.
    pub commands: CommandRestrictions,

    /// Pairing settings.
    pub pairing: PairingConfig,

    /// Working directory for snapshots; defaults to the process cwd.
    pub workspace_root: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            event_capacity: 256,
            trace_capacity: 500,
            commands: CommandRestrictions::default(),
            pairing: PairingConfig::default(),
            workspace_root: None,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidParams(format!("invalid config {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Loaded bridge config");
        Ok(config)
    }

    /// Load from a file if it exists, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => Err(Error::not_found(format!(
                "config file not found: {}",
                p.display()
            ))),
            None => Ok(Self::default()),
        }
    }

    /// Snapshot working directory, falling back to the process cwd.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.trace_capacity, 500);
        assert!(config.commands.allow.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: BridgeConfig = toml::from_str(
            r#"
            port = 4900

            [commands]
            deny = ["workbench.action.terminal.kill"]
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 4900);
        assert_eq!(config.commands.deny.len(), 1);
        assert_eq!(config.event_capacity, 256);
    }
}
