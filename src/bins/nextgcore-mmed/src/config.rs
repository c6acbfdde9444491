//! MME Configuration
//!
//! The `mme:` section of the YAML configuration file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timer::{MmeTimerConfigs, TimerConfig};

/// Default bound on T3413 paging retransmissions
pub const MAX_NUM_OF_PAGING: u32 = 2;
/// Default maximum number of UEs
pub const MAX_NUM_OF_UE: usize = 1024;
/// Default T3413 value in milliseconds
pub const DEFAULT_T3413_MSEC: u64 = 2000;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Parse error: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxConf {
    pub ue: usize,
}

impl Default for MaxConf {
    fn default() -> Self {
        Self { ue: MAX_NUM_OF_UE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConf {
    /// Paging retransmissions before giving up
    pub max_retry: u32,
}

impl Default for PagingConf {
    fn default() -> Self {
        Self {
            max_retry: MAX_NUM_OF_PAGING,
        }
    }
}

/// Timer values in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConf {
    pub t3413: u64,
}

impl Default for TimeConf {
    fn default() -> Self {
        Self {
            t3413: DEFAULT_T3413_MSEC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConf {
    /// Number of EMM worker tasks
    pub count: usize,
}

impl Default for WorkerConf {
    fn default() -> Self {
        Self { count: 4 }
    }
}

/// MME configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmeConfig {
    pub max: MaxConf,
    pub paging: PagingConf,
    pub time: TimeConf,
    pub worker: WorkerConf,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    mme: MmeConfig,
}

impl MmeConfig {
    /// Parses a configuration document and validates it
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: Option<ConfigFile> = serde_yaml::from_str(text)?;
        let config = file.unwrap_or_default().mme;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Configuration file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.count == 0 {
            return Err(ConfigError::ValidationError(
                "worker.count must be at least 1".to_string(),
            ));
        }
        if self.time.t3413 == 0 {
            return Err(ConfigError::ValidationError(
                "time.t3413 must be greater than 0".to_string(),
            ));
        }
        if self.max.ue == 0 {
            return Err(ConfigError::ValidationError(
                "max.ue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Timer values derived from the configuration
    pub fn timer_configs(&self) -> MmeTimerConfigs {
        MmeTimerConfigs {
            t3413: TimerConfig::new(self.paging.max_retry, Duration::from_millis(self.time.t3413)),
        }
    }
}
