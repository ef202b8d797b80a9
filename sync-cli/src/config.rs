//! Configuration loading for the notesync CLI.
//!
//! Configuration is loaded from a TOML file (`--config`); every field has
//! a default, so the file may be missing keys or be omitted entirely.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Where ledgers live.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Which account to inspect.
    #[serde(default)]
    pub sync: SyncSection,
    /// Log filter.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `<account>.sync.toml` ledger files.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
}

/// Account selection.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    /// Account id (default: "default").
    #[serde(default = "default_account")]
    pub account: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_ledger_dir() -> PathBuf {
    directories::ProjectDirs::from("io", "notesync", "notesync")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_account() -> String {
    "default".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_dir: default_ledger_dir(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            account: default_account(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sync.account, "default");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[storage]
ledger_dir = "/var/lib/notesync"

[sync]
account = "alice"

[logging]
filter = "notesync_engine=debug"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.ledger_dir, PathBuf::from("/var/lib/notesync"));
        assert_eq!(config.sync.account, "alice");
        assert_eq!(config.logging.filter, "notesync_engine=debug");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = toml::from_str("[sync]\naccount = \"bob\"\n").unwrap();
        assert_eq!(config.sync.account, "bob");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\naccount = \"carol\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sync.account, "carol");
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync\naccount = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
