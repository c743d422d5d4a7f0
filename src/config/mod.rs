//! Configuration module
//!
//! Handles loading and saving muxnet configuration for the demo binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::ConnectionSettings;

/// Default port for the bundled echo service
pub const DEFAULT_PORT: u16 = 7171;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Human-readable name for this host
    pub name: String,

    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "muxnet".to_string()),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port the demo service listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Wall-clock deadline for reading one header or body, in ms
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// How many short reads are tolerated per header or body
    #[serde(default = "default_read_attempts")]
    pub max_read_attempts: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_read_timeout() -> u64 {
    ConnectionSettings::default().read_timeout_ms
}

fn default_read_attempts() -> u32 {
    ConnectionSettings::default().max_read_attempts
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            read_timeout_ms: default_read_timeout(),
            max_read_attempts: default_read_attempts(),
        }
    }
}

impl NetworkConfig {
    /// Translate the configured timeouts into connection settings
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_timeout_ms: self.read_timeout_ms,
            max_read_attempts: self.max_read_attempts,
            ..Default::default()
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        Self::load(&Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("muxnet")
            .join("config.toml")
    }
}

/// Generate a commented sample configuration
pub fn generate_sample_config() -> String {
    let sample = toml::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| String::new());

    format!("# muxnet configuration\n#\n# Place this file at {}\n\n{}",
        Config::default_path().display(),
        sample
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.network.port, DEFAULT_PORT);
        assert_eq!(parsed.network.read_timeout_ms, 30_000);
        assert_eq!(parsed.network.max_read_attempts, 30);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str("[network]\nport = 9000\n").unwrap();

        assert_eq!(parsed.network.port, 9000);
        assert_eq!(parsed.network.max_read_attempts, 30);
        assert!(!parsed.general.verbose);
    }

    #[test]
    fn test_connection_settings_translation() {
        let network = NetworkConfig {
            port: 9000,
            read_timeout_ms: 1500,
            max_read_attempts: 5,
        };
        let settings = network.connection_settings();

        assert_eq!(settings.read_timeout_ms, 1500);
        assert_eq!(settings.max_read_attempts, 5);
    }
}
