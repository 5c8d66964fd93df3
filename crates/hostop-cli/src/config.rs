//! Configuration loading and types

use std::path::{Path, PathBuf};

use hostop_exec::{ConnectionInfo, Credential};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the hostop CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Named remote targets
    #[serde(default)]
    pub target: Vec<TargetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            target: Vec::new(),
        }
    }
}

/// A named host with its credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Name used with `--target`
    pub name: String,
    /// IP address or hostname
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub user: String,
    /// Authentication strategy (defaults to the SSH agent)
    #[serde(default)]
    pub auth: Credential,
}

impl TargetConfig {
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo::new(&self.host, &self.user).with_port(self.port)
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("unable to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be parsed
    pub fn load_default() -> eyre::Result<Self> {
        let paths = [
            Some(PathBuf::from("hostop.toml")),
            dirs::config_dir().map(|p| p.join("hostop/hostop.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// Look up a target by name
    pub fn find(&self, name: &str) -> Option<&TargetConfig> {
        self.target.iter().find(|t| t.name == name)
    }
}
