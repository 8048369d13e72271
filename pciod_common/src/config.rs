//! TOML configuration primitives.
//!
//! Any `DeserializeOwned` type can be read from a file with
//! [`ConfigLoader::load`]. [`SharedConfig`] is the `[shared]` table common to
//! the daemon and the one-shot tools: log level and instance name.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Reading or checking a configuration failed.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Configuration file not found")]
    FileNotFound,

    /// Unreadable file, bad TOML syntax or a field of the wrong shape.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Well-formed but unusable values.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Baseline log verbosity, raised by `-v` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by `tracing` level and filter parsers.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// The `[shared]` table.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "pciod-arm-left"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name, logged at start-up to tell daemons on one host apart.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "pciod".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Reject an empty or whitespace-only instance name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a value from a TOML file.
///
/// A missing file maps to [`ConfigError::FileNotFound`]; every other read or
/// decode failure to [`ConfigError::ParseError`].
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::FileNotFound);
            }
            Err(e) => return Err(ConfigError::ParseError(format!("{}: {e}", path.display()))),
        };
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        #[serde(default)]
        shared: SharedConfig,
    }

    fn load_str(text: &str) -> Result<Wrapper, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        Wrapper::load(file.path())
    }

    #[test]
    fn shared_table_is_optional() {
        let w = load_str("").unwrap();
        assert_eq!(w.shared.log_level, LogLevel::Info);
        assert_eq!(w.shared.service_name, "pciod");
    }

    #[test]
    fn log_level_names_match_tracing() {
        let w = load_str("[shared]\nlog_level = \"warn\"\n").unwrap();
        assert_eq!(w.shared.log_level, LogLevel::Warn);
        assert_eq!(w.shared.log_level.as_directive(), "warn");
        assert!(matches!(
            load_str("[shared]\nlog_level = \"loud\"\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn blank_service_name_rejected() {
        let shared = SharedConfig {
            service_name: "  ".to_string(),
            ..SharedConfig::default()
        };
        assert!(matches!(shared.validate(), Err(ConfigError::ValidationError(_))));
        assert!(SharedConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_and_bad_syntax() {
        assert!(matches!(
            SharedConfig::load(Path::new("/nonexistent/pciod.toml")),
            Err(ConfigError::FileNotFound)
        ));
        assert!(matches!(load_str("shared = {{"), Err(ConfigError::ParseError(_))));
    }
}
