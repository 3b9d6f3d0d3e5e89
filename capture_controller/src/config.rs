use crate::camera::CameraSettings;
use crate::counter::CounterConfig;
use crate::storage::MountConfig;
use file_browser::BrowserConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// flexi_logger level spec, e.g. `"info"` or `"info, capture_controller::sink=debug"`.
    pub spec: String,
    pub directory: PathBuf,
    pub rotate_bytes: u64,
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            spec: "info".to_string(),
            directory: PathBuf::from("./logs"),
            rotate_bytes: 500_000,
            keep_files: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum time between two completed frames.
    pub cadence_ms: u64,
    pub mount: MountConfig,
    pub counter: CounterConfig,
    pub camera: CameraSettings,
    pub logging: LoggingConfig,
    pub file_browser: BrowserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cadence_ms: 2000,
            mount: MountConfig::default(),
            counter: CounterConfig::default(),
            camera: CameraSettings::default(),
            logging: LoggingConfig::default(),
            file_browser: BrowserConfig::default(),
        }
    }
}

impl Config {
    /// Read `path` if given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_json(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cadence_ms == 0 {
            return Err(ConfigError::Invalid("cadence_ms must be positive".to_string()));
        }
        if self.mount.max_files == 0 {
            return Err(ConfigError::Invalid("mount.max_files must be positive".to_string()));
        }
        if self.camera.fb_count == 0 {
            return Err(ConfigError::Invalid("camera.fb_count must be positive".to_string()));
        }
        if self.logging.spec.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.spec is empty".to_string()));
        }
        Ok(())
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}
