//! Configuration file support for dosetl.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/dosetl/config.toml`.

use crate::basal::{utc_offset_from_minutes, RepeatingBasalSchedule, RepeatingScheduleValue};
use crate::timeline::{delta_from_minutes, TimelineOptions, DEFAULT_DELTA_MINUTES};
use crate::{Error, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub timeline: TimelineConfig,

    #[serde(default)]
    pub basal: BasalConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Timeline resolution configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: i64,

    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            delta_minutes: default_delta_minutes(),
            max_buckets: default_max_buckets(),
        }
    }
}

/// One scheduled basal rate, starting at a local time of day ("HH:MM")
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BasalRateEntry {
    pub start: String,
    pub rate: f64,
}

/// Basal schedule configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasalConfig {
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_schedule")]
    pub schedule: Vec<BasalRateEntry>,
}

impl Default for BasalConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            schedule: default_schedule(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("dosetl")
}

fn default_delta_minutes() -> i64 {
    DEFAULT_DELTA_MINUTES
}

fn default_max_buckets() -> usize {
    100_000
}

fn default_schedule() -> Vec<BasalRateEntry> {
    vec![BasalRateEntry {
        start: "00:00".into(),
        rate: 1.0,
    }]
}

impl TimelineConfig {
    /// Timeline options with this resolution and bucket limit
    pub fn options(&self) -> Result<TimelineOptions> {
        Ok(TimelineOptions {
            delta: delta_from_minutes(self.delta_minutes)?,
            max_buckets: Some(self.max_buckets),
            ..TimelineOptions::default()
        })
    }
}

impl BasalConfig {
    /// Build the daily schedule described by this section
    pub fn schedule(&self) -> Result<RepeatingBasalSchedule> {
        let items = self
            .schedule
            .iter()
            .map(|entry| {
                let start_time = NaiveTime::parse_from_str(&entry.start, "%H:%M").map_err(|e| {
                    Error::Configuration(format!(
                        "Invalid basal start time {:?}: {}",
                        entry.start, e
                    ))
                })?;
                Ok(RepeatingScheduleValue {
                    start_time,
                    value: entry.rate,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        RepeatingBasalSchedule::new(items, utc_offset_from_minutes(self.utc_offset_minutes)?)
    }
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Check that every section describes something usable
    pub fn validate(&self) -> Result<()> {
        self.timeline.options()?;
        self.basal.schedule()?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("dosetl").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Path of the dose log inside the data directory
    pub fn dose_log_path(&self) -> PathBuf {
        self.data.data_dir.join("doses.jsonl")
    }
}
