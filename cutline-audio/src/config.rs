//! Configuration for the Cutline audio engine
//!
//! A single TOML file with four optional tables. Every field has a built-in
//! default, so an empty (or missing) file yields the stock tuning:
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [scheduler]
//! reschedule_interval_ms = 250
//! base_ahead_sec = 0.5
//! max_ahead_sec = 2.0
//! rapid_seek_velocity = 5.0
//! seek_min_delta_sec = 0.1
//! progress_tolerance_sec = 0.08
//! progress_tolerance_ratio = 0.35
//!
//! [loader]
//! max_attempts = 3
//! base_delay_ms = 1000
//! max_delay_ms = 10000
//!
//! [output]
//! device = "default"
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Name of the config file looked up in the platform config directory
pub const CONFIG_FILE_NAME: &str = "audio.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CUTLINE_AUDIO_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub scheduler: SchedulerSettings,
    pub loader: LoaderSettings,
    pub output: OutputSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Scheduling pass and seek classification tuning
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Period of the scheduling timer and the pass debounce window
    pub reschedule_interval_ms: u64,
    /// Normal look-ahead window (seconds)
    pub base_ahead_sec: f64,
    /// Upper bound of the look-ahead window during rapid scrubbing (seconds)
    pub max_ahead_sec: f64,
    /// Seek velocity (timeline seconds per real second) above which the
    /// look-ahead window widens
    pub rapid_seek_velocity: f64,
    /// Time jumps smaller than this are never treated as seeks (seconds)
    pub seek_min_delta_sec: f64,
    /// Minimum tolerance when comparing a jump to expected progress (seconds)
    pub progress_tolerance_sec: f64,
    /// Tolerance as a fraction of the expected progress
    pub progress_tolerance_ratio: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            reschedule_interval_ms: 250,
            base_ahead_sec: 0.5,
            max_ahead_sec: 2.0,
            rapid_seek_velocity: 5.0,
            seek_min_delta_sec: 0.1,
            progress_tolerance_sec: 0.08,
            progress_tolerance_ratio: 0.35,
        }
    }
}

impl SchedulerSettings {
    pub fn reschedule_interval(&self) -> Duration {
        Duration::from_millis(self.reschedule_interval_ms.max(1))
    }
}

/// Buffer loader retry policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Failed attempts after which automatic loading stops until a manual retry
    pub max_attempts: u32,
    /// First retry delay; doubles on each further failure
    pub base_delay_ms: u64,
    /// Retry delay cap
    pub max_delay_ms: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

/// Audio output device selection
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Device name; `None` or `"default"` selects the host default device
    pub device: Option<String>,
}

impl OutputSettings {
    /// Requested device name, with `"default"` normalized to `None`
    pub fn device_name(&self) -> Option<String> {
        self.device
            .as_deref()
            .filter(|name| !name.is_empty() && *name != "default")
            .map(str::to_string)
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from a TOML file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Resolve and load configuration.
    ///
    /// Priority: explicit path (CLI) > `CUTLINE_AUDIO_CONFIG` > platform config
    /// directory > built-in defaults.
    pub async fn resolve(cli_path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        match cutline_common::config::resolve_config_file(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME)? {
            Some(path) => {
                let config = Self::load(&path).await?;
                Ok((config, Some(path)))
            }
            None => {
                info!("No configuration file found, using built-in defaults");
                Ok((Self::default(), None))
            }
        }
    }
}
