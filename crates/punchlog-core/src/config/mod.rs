//! Configuration parsing and management.
//!
//! This module handles the `punchlog.toml` file shared by the daemon and the
//! CLI: where the ledger lives, how long appends may wait, and which
//! subjects are enrolled. The ingest API key is never stored here; the file
//! only names the environment variable that holds it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::append::AppendConfig;
use crate::ledger::StoreOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PunchlogConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Ledger tuning.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Enrolled subjects.
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

impl PunchlogConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for zero timeouts or retries, a busy timeout
    /// longer than the append timeout, duplicate subject ids, and empty
    /// subject names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.busy_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "ledger.busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.ledger.append_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "ledger.append_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.ledger.busy_timeout_ms > self.ledger.append_timeout_ms {
            return Err(ConfigError::Validation(
                "ledger.busy_timeout_ms must not exceed ledger.append_timeout_ms".to_string(),
            ));
        }
        if self.ledger.max_append_retries == 0 {
            return Err(ConfigError::Validation(
                "ledger.max_append_retries must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for subject in &self.subjects {
            if !seen.insert(subject.uid) {
                return Err(ConfigError::Validation(format!(
                    "duplicate subject uid {}",
                    subject.uid
                )));
            }
            if subject.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "subject {} has an empty name",
                    subject.uid
                )));
            }
        }
        Ok(())
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    /// HTTP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Path to the ledger database.
    #[serde(default = "default_ledger_db")]
    pub ledger_db: PathBuf,

    /// Environment variable holding the ingest API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Device tag recorded when a terminal does not send one.
    #[serde(default = "default_device_tag")]
    pub default_device_tag: String,

    /// Serve `/metrics`.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ledger_db: default_ledger_db(),
            api_key_env: default_api_key_env(),
            default_device_tag: default_device_tag(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Ledger tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Bound on one append, including retries, in milliseconds.
    #[serde(default = "default_append_timeout_ms")]
    pub append_timeout_ms: u64,

    /// Retries after losing the race for the tail.
    #[serde(default = "default_max_append_retries")]
    pub max_append_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            append_timeout_ms: default_append_timeout_ms(),
            max_append_retries: default_max_append_retries(),
        }
    }
}

impl LedgerConfig {
    /// Connection options for the store.
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Settings for the append engine.
    #[must_use]
    pub const fn append_config(&self) -> AppendConfig {
        AppendConfig {
            max_retries: self.max_append_retries,
            timeout: Duration::from_millis(self.append_timeout_ms),
        }
    }
}

/// An enrolled subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectConfig {
    /// Terminal slot id.
    pub uid: u32,

    /// Display name.
    pub name: String,

    /// Department, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_ledger_db() -> PathBuf {
    PathBuf::from("punchlog.db")
}

fn default_api_key_env() -> String {
    "PUNCHLOG_API_KEY".to_string()
}

fn default_device_tag() -> String {
    "ESP32_DEV_V1".to_string()
}

const fn default_metrics_enabled() -> bool {
    true
}

const fn default_busy_timeout_ms() -> u64 {
    5000
}

const fn default_append_timeout_ms() -> u64 {
    5000
}

const fn default_max_append_retries() -> u32 {
    crate::append::DEFAULT_MAX_RETRIES
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [daemon]
            listen_addr = "0.0.0.0:9000"
            ledger_db = "/var/lib/punchlog/ledger.db"
            api_key_env = "TERMINAL_KEY"
            default_device_tag = "LOBBY"
            metrics_enabled = false

            [ledger]
            busy_timeout_ms = 250
            append_timeout_ms = 1000
            max_append_retries = 4

            [[subjects]]
            uid = 7
            name = "Ada Lovelace"
            department = "Engineering"

            [[subjects]]
            uid = 9
            name = "Grace Hopper"
        "#;

        let config = PunchlogConfig::from_toml(toml).unwrap();
        assert_eq!(config.daemon.listen_addr.port(), 9000);
        assert_eq!(config.daemon.ledger_db, PathBuf::from("/var/lib/punchlog/ledger.db"));
        assert_eq!(config.daemon.api_key_env, "TERMINAL_KEY");
        assert_eq!(config.daemon.default_device_tag, "LOBBY");
        assert!(!config.daemon.metrics_enabled);
        assert_eq!(config.ledger.store_options().busy_timeout, Duration::from_millis(250));
        assert_eq!(config.ledger.append_config().max_retries, 4);
        assert_eq!(config.ledger.append_config().timeout, Duration::from_secs(1));
        assert_eq!(config.subjects.len(), 2);
        assert_eq!(config.subjects[1].department, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PunchlogConfig::from_toml("").unwrap();
        assert_eq!(config, PunchlogConfig::default());
        assert_eq!(config.daemon.listen_addr, default_listen_addr());
        assert_eq!(config.daemon.api_key_env, "PUNCHLOG_API_KEY");
        assert_eq!(config.daemon.default_device_tag, "ESP32_DEV_V1");
        assert_eq!(config.ledger.max_append_retries, 16);
    }

    #[test]
    fn test_rejects_zero_limits() {
        for toml in [
            "[ledger]\nbusy_timeout_ms = 0",
            "[ledger]\nappend_timeout_ms = 0",
            "[ledger]\nmax_append_retries = 0",
            "[ledger]\nbusy_timeout_ms = 6000\nappend_timeout_ms = 5000",
        ] {
            let err = PunchlogConfig::from_toml(toml).unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{toml}");
        }
    }

    #[test]
    fn test_rejects_duplicate_subjects() {
        let toml = r#"
            [[subjects]]
            uid = 7
            name = "Ada"

            [[subjects]]
            uid = 7
            name = "Also Ada"
        "#;
        let err = PunchlogConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate subject uid 7"));
    }

    #[test]
    fn test_rejects_blank_names() {
        let toml = "[[subjects]]\nuid = 1\nname = \"  \"";
        assert!(PunchlogConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_listen_addr() {
        let err = PunchlogConfig::from_toml("[daemon]\nlisten_addr = \"nowhere\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = PunchlogConfig::default();
        config.subjects.push(SubjectConfig {
            uid: 3,
            name: "Edsger".to_string(),
            department: None,
        });

        let rendered = config.to_toml().unwrap();
        assert_eq!(PunchlogConfig::from_toml(&rendered).unwrap(), config);
    }
}
