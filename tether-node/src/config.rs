//! Configuration for the tether node.
//!
//! The link settings sit at the top level of the file, exactly as
//! `tether_core::Settings` reads them; the node adds two tables of its own.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tether_core::{Settings, SocketError};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Link to the control node.
    #[serde(flatten)]
    pub link: Settings,
    /// Host loop settings.
    pub host: HostConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Host loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    /// Milliseconds between two host ticks.
    pub tick_interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl NodeConfig {
    /// Load the configuration; relative paths in the link settings resolve
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, SocketError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        if let Some(dir) = path.parent() {
            config.link = config.link.with_base_dir(dir);
        }
        Ok(config)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.host.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_settings_live_at_the_top_level() {
        let config: NodeConfig = toml::from_str(
            r#"
            server-socket = "node.example"
            server-port = 9000

            [authentication]
            password = "pw"

            [host]
            tick-interval-ms = 20

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.link.address(), "node.example:9000");
        assert_eq!(config.link.authentication.password, "pw");
        assert_eq!(config.tick_interval().as_millis(), 20);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn generated_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether-node.toml");
        std::fs::write(&path, toml::to_string_pretty(&NodeConfig::default()).unwrap()).unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.link.server_port, 8443);
        assert_eq!(config.link.ca_path(), dir.path().join("certificate.crt"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(NodeConfig::load(Path::new("/nonexistent/tether-node.toml")).is_err());
    }
}
