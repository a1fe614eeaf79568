use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cloudrender_core::{SessionSettings, DEFAULT_API_URL};
use cloudrender_engine::TransportSettings;
use engine_logging::{engine_debug, engine_info};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::logging::LogDestination;

pub const CONFIG_FILENAME: &str = "cloudrender.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed configuration in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
    #[error("could not serialize configuration: {0}")]
    Serialize(#[from] ron::Error),
    #[error("could not write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Everything the shell persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionSettings,
    /// Login endpoint of the identity provider.
    pub auth_url: String,
    /// Last username that logged in successfully.
    pub username: String,
    pub log_level: String,
    pub log_destination: LogDestination,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            auth_url: format!("{DEFAULT_API_URL}/auth/login"),
            username: String::new(),
            log_level: "info".to_string(),
            log_destination: LogDestination::default(),
            request_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    /// Loads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                engine_debug!("No configuration at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        ron::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes through a sibling temp file so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new())?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_error)?;
        tmp.write_all(content.as_bytes()).map_err(write_error)?;
        tmp.flush().map_err(write_error)?;
        tmp.as_file_mut().sync_all().map_err(write_error)?;
        tmp.persist(path).map_err(|e| write_error(e.error))?;
        engine_info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            ..TransportSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let mut config = AppConfig::default();
        config.username = "ada".to_string();
        config.session.download_folder = Some(dir.path().to_path_buf());
        config.log_destination = LogDestination::Both;

        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_replaces_the_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        AppConfig {
            username: "first".to_string(),
            ..AppConfig::default()
        }
        .save(&path)
        .unwrap();
        let second = AppConfig {
            username: "second".to_string(),
            ..AppConfig::default()
        };

        second.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_into_a_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone").join(CONFIG_FILENAME);

        let err = AppConfig::default().save(&path).unwrap_err();

        assert!(matches!(err, ConfigError::Write { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "(username: \"grace\", session: (api_url: \"http://localhost:8080\"))").unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.username, "grace");
        assert_eq!(config.session.api_url, "http://localhost:8080");
        assert_eq!(config.session.file_type, "blend");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "(username: ").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn request_timeout_is_never_zero() {
        let config = AppConfig {
            request_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.transport_settings().request_timeout, Duration::from_secs(1));
    }
}
