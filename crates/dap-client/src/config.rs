//! Client configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use dap4_parser::ChecksumMode;
use dap_model::Protocol;
use serde::{Deserialize, Serialize};

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by the HTTP transport and the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total request timeout in seconds.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// User-Agent header sent with every request.
    pub user_agent: String,

    /// Upper bound on concurrent fetches in `fetch_many`.
    pub max_concurrency: usize,

    /// Request grid maps together with the array when slicing a grid.
    pub output_grid: bool,

    /// Checksum handling for `.dap` responses.
    pub verify_checksums: ChecksumMode,

    /// Protocol used for plain `http(s)://` URLs.
    pub default_protocol: Protocol,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 30,
            user_agent: format!("dap-client/{}", env!("CARGO_PKG_VERSION")),
            max_concurrency: 8,
            output_grid: true,
            verify_checksums: ChecksumMode::Auto,
            default_protocol: Protocol::Dap2,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("DAP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("DAP_CONNECT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.connect_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("DAP_USER_AGENT") {
            config.user_agent = val;
        }

        if let Ok(val) = env::var("DAP_MAX_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.max_concurrency = n;
            }
        }

        if let Ok(val) = env::var("DAP_OUTPUT_GRID") {
            config.output_grid = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("DAP_VERIFY_CHECKSUMS") {
            if let Some(mode) = ChecksumMode::from_str(&val) {
                config.verify_checksums = mode;
            }
        }

        if let Ok(val) = env::var("DAP_DEFAULT_PROTOCOL") {
            if let Some(protocol) = Protocol::from_str(&val) {
                config.default_protocol = protocol;
            }
        }

        config
    }

    /// Parse a YAML document; missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }

        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be > 0".to_string());
        }

        if self.connect_timeout_secs > self.timeout_secs {
            return Err("connect_timeout_secs must not exceed timeout_secs".to_string());
        }

        if self.max_concurrency == 0 {
            return Err("max_concurrency must be > 0".to_string());
        }

        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.verify_checksums, ChecksumMode::Auto);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ClientConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_connect_timeout_above_total() {
        let config = ClientConfig {
            timeout_secs: 5,
            connect_timeout_secs: 10,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("connect_timeout_secs"));
    }

    #[test]
    fn test_yaml_partial_document() {
        let config = ClientConfig::from_yaml_str(
            "timeout_secs: 10\nconnect_timeout_secs: 2\ndefault_protocol: dap4\nverify_checksums: per_chunk\n",
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.default_protocol, Protocol::Dap4);
        assert_eq!(config.verify_checksums, ChecksumMode::PerChunk);
        assert_eq!(config.max_concurrency, 8);
    }

    #[test]
    fn test_yaml_invalid_values() {
        assert!(matches!(
            ClientConfig::from_yaml_str("max_concurrency: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_yaml_str("timeout_secs: [1, 2]\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        let config = ClientConfig {
            output_grid: false,
            ..Default::default()
        };
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        let loaded = ClientConfig::from_yaml_file(&path).unwrap();
        assert!(!loaded.output_grid);
        assert_eq!(loaded.user_agent, config.user_agent);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ClientConfig::from_yaml_file("/nonexistent/dap.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
