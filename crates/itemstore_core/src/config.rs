//! Repository and logging configuration.
//!
//! # Responsibility
//! - Deserialize settings from JSON with defaults for every omitted field.
//! - Reject unusable settings in `validate` before anything is opened.

use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::logging::{default_log_level, normalize_level, normalize_log_dir};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const MAX_BUSY_TIMEOUT_MS: u64 = 60_000;
const MAX_POOL_PREWARM: usize = 64;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config document: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level_string")]
    pub level: String,
    /// Absolute directory for rotated log files.
    pub log_dir: PathBuf,
}

fn default_level_string() -> String {
    default_log_level().to_string()
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, log_dir: impl AsRef<Path>) -> Self {
        Self {
            level: level.into(),
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }

    /// Build-mode default level writing into `log_dir`.
    pub fn with_default_level(log_dir: impl AsRef<Path>) -> Self {
        Self::new(default_log_level(), log_dir)
    }
}

/// Settings for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Database file; `None` keeps the repository in memory.
    pub db_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    /// Views created up front by `ViewPool::with_config`.
    pub pool_prewarm: usize,
    pub logging: Option<LoggingConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pool_prewarm: 0,
            logging: None,
        }
    }
}

impl RepositoryConfig {
    /// File-backed repository with default settings.
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self {
            db_path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON config document.
    pub fn from_json(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// # Errors
    /// - Busy timeout of zero or above one minute.
    /// - Pool pre-warm count above 64.
    /// - Empty database path.
    /// - Unsupported log level or a relative log directory.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "busy_timeout_ms must be within 1..={MAX_BUSY_TIMEOUT_MS}, got {}",
                self.busy_timeout_ms
            )));
        }
        if self.pool_prewarm > MAX_POOL_PREWARM {
            return Err(ConfigError::Invalid(format!(
                "pool_prewarm must be at most {MAX_POOL_PREWARM}, got {}",
                self.pool_prewarm
            )));
        }
        if matches!(&self.db_path, Some(path) if path.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("db_path cannot be empty".to_string()));
        }
        if let Some(logging) = &self.logging {
            normalize_level(&logging.level).map_err(ConfigError::Invalid)?;
            normalize_log_dir(&logging.log_dir).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RepositoryConfig};
    use crate::db::DEFAULT_BUSY_TIMEOUT_MS;

    #[test]
    fn omitted_fields_take_defaults() {
        let config = RepositoryConfig::from_json("{}").unwrap();
        assert_eq!(config, RepositoryConfig::default());
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn logging_level_defaults_to_build_mode() {
        let config =
            RepositoryConfig::from_json(r#"{ "logging": { "log_dir": "/tmp/itemstore-logs" } }"#)
                .unwrap();
        let logging = config.logging.unwrap();
        assert_eq!(logging.level, crate::logging::default_log_level());
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(matches!(
            RepositoryConfig::from_json(r#"{ "busy_timeout_ms": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RepositoryConfig::from_json(
                r#"{ "logging": { "level": "loud", "log_dir": "/tmp/x" } }"#
            ),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RepositoryConfig::from_json(r#"{ "pool": 3 }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
