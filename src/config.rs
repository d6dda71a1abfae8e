use crate::controller::source::ShiftRegisterPins;
use crate::persistence::medium::DEFAULT_MEDIUM_SIZE;
use crate::persistence::options_store::GAMEPAD_STORAGE_INDEX;
use crate::persistence::SocdMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/snespad";
const CONFIG_FILE: &str = "config.toml";
const MEDIUM_FILE: &str = "eeprom.bin";

/// Minimum time between two polling ticks
pub const GAMEPAD_POLL_MS: u64 = 1;
/// Pause between two latches of the sampling thread
pub const GAMEPAD_POLL_MICRO: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Pad connector wiring
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub clock: u8,
    pub latch: u8,
    pub data: u8,
    /// Dedicated settings line; leave unset when the board has none
    pub settings: Option<u8>,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            clock: 6,
            latch: 7,
            data: 8,
            settings: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub poll_interval_ms: u64,
    pub sample_interval_us: u64,
    pub stats_interval_secs: i64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: GAMEPAD_POLL_MS,
            sample_interval_us: GAMEPAD_POLL_MICRO,
            stats_interval_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Emulated EEPROM image; defaults to a file next to the config
    pub medium_path: Option<PathBuf>,
    pub medium_size: usize,
    pub options_slot: usize,
    /// SOCD mode restored on a corrupt record, `neutral` when unset
    pub default_socd_mode: Option<SocdMode>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            medium_path: None,
            medium_size: DEFAULT_MEDIUM_SIZE,
            options_slot: GAMEPAD_STORAGE_INDEX,
            default_socd_mode: None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub pins: PinConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Loads `path`, writing a default file first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                "Config file {} does not exist, writing defaults",
                path.display()
            );
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Wrote config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pins = &self.pins;
        let mut used = vec![pins.clock, pins.latch, pins.data];
        used.extend(pins.settings);
        used.sort_unstable();
        if used.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "pins must be distinct: {:?}",
                pins
            )));
        }
        if self.polling.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.polling.stats_interval_secs <= 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shift_register_pins(&self) -> ShiftRegisterPins {
        ShiftRegisterPins {
            clock: self.pins.clock,
            latch: self.pins.latch,
            data: self.pins.data,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(self.polling.sample_interval_us)
    }

    pub fn default_socd_mode(&self) -> SocdMode {
        self.storage.default_socd_mode.unwrap_or(SocdMode::Neutral)
    }

    pub fn medium_path(&self) -> PathBuf {
        self.storage
            .medium_path
            .clone()
            .unwrap_or_else(|| config_dir().join(MEDIUM_FILE))
    }
}

pub fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.default_socd_mode(), SocdMode::Neutral);
        assert_eq!(config.pins.settings, None);
    }

    #[test]
    fn partial_file_overrides_fields() {
        let config = AppConfig::from_toml(
            r#"
            [pins]
            settings = 20

            [storage]
            default_socd_mode = "up_priority"
            options_slot = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.pins.settings, Some(20));
        assert_eq!(config.pins.clock, 6);
        assert_eq!(config.default_socd_mode(), SocdMode::UpPriority);
        assert_eq!(config.storage.options_slot, 64);
        assert_eq!(config.storage.medium_size, DEFAULT_MEDIUM_SIZE);
    }

    #[test]
    fn unknown_socd_mode_fails_to_parse() {
        let result = AppConfig::from_toml("[storage]\ndefault_socd_mode = \"sideways\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn shared_pins_are_invalid() {
        let mut config = AppConfig::default();
        config.pins.settings = Some(config.pins.data);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_poll_interval_is_invalid() {
        let mut config = AppConfig::default();
        config.polling.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(created, loaded);
    }
}
