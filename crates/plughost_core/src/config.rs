//! Host configuration.
//!
//! Values come from an optional JSON file, then `PLUGHOST_*` environment
//! overrides. Missing fields fall back to defaults.

use crate::logging::{default_log_level, init_logging, normalize_level};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_LOG_LEVEL: &str = "PLUGHOST_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "PLUGHOST_LOG_DIR";
pub const ENV_DB_PATH: &str = "PLUGHOST_DB_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files; logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// SQLite file; an in-memory database is used when unset.
    pub database_path: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            database_path: None,
        }
    }
}

impl HostConfig {
    /// Reads a JSON config file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(dir) = non_empty(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = non_empty(ENV_DB_PATH) {
            self.database_path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.log_level).map_err(ConfigError::Invalid)?;
        if let Some(dir) = &self.log_dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path: {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Starts file logging when `log_dir` is set.
    pub fn init_logging(&self) -> Result<(), String> {
        match &self.log_dir {
            Some(dir) => init_logging(&self.log_level, &dir.to_string_lossy()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "cannot read config {}: {message}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "config {} is not valid JSON: {message}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, HostConfig, ENV_DB_PATH, ENV_LOG_LEVEL};
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(file, r#"{{"database_path": "/var/lib/plughost/host.sqlite3"}}"#)
            .expect("write config");

        let config = HostConfig::load(file.path()).expect("load config");
        assert_eq!(config.log_level, HostConfig::default().log_level);
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/plughost/host.sqlite3"))
        );
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let config = HostConfig::default()
            .with_env_overrides(|key| match key {
                ENV_LOG_LEVEL => Some("warn".to_string()),
                ENV_DB_PATH => Some("/tmp/host.sqlite3".to_string()),
                _ => None,
            })
            .expect("overrides");
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/host.sqlite3")));
    }

    #[test]
    fn rejects_unknown_level_and_relative_log_dir() {
        let err = HostConfig::default()
            .with_env_overrides(|key| (key == ENV_LOG_LEVEL).then(|| "loud".to_string()))
            .expect_err("bad level");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = HostConfig {
            log_dir: Some(PathBuf::from("logs")),
            ..HostConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = HostConfig::load("/definitely/missing/plughost.json").expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
