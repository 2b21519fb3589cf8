use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_DIR: &str = "storycast";

/// Timing of the prepare wait loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub poll_interval_ms: u64,
    /// Ticks per round before a "still waiting" diagnostic is logged
    pub max_wait_ticks: u32,
    /// Rounds before the attempt is abandoned
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_wait_ticks: 20,
            max_retries: 10,
        }
    }
}

impl RetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Worst-case time spent waiting for a prepare
    pub fn worst_case(&self) -> Duration {
        self.poll_interval() * self.max_wait_ticks.max(1) * self.max_retries.max(1)
    }
}

/// Timing of the progress update loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub shutdown_join_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2000,
            interval_ms: 500,
            shutdown_join_ms: 3000,
        }
    }
}

impl ProgressConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn shutdown_join(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_ms)
    }
}

/// Settings consumed by the playback engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub progress: ProgressConfig,
    /// Amount rewound when resuming after a phone call
    pub resume_rewind_ms: u64,
    /// Whether the decoder consumes ICY/shoutcast streams directly
    pub native_stream_support: bool,
    pub manifest_extensions: Vec<String>,
    pub max_consecutive_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            progress: ProgressConfig::default(),
            resume_rewind_ms: 3000,
            native_stream_support: false,
            manifest_extensions: vec!["m3u".to_string(), "pls".to_string()],
            max_consecutive_failures: 5,
        }
    }
}

/// Settings of the loopback stream relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_address: String,
    pub connect_timeout_ms: u64,
    pub read_buffer_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            connect_timeout_ms: 10_000,
            read_buffer_bytes: 16 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Player configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub playback: EngineConfig,
    pub relay: RelayConfig,
    pub preferred_device: Option<String>,
    pub database_path: PathBuf,
    pub cache_directory: PathBuf,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        Self {
            playback: EngineConfig::default(),
            relay: RelayConfig::default(),
            preferred_device: None,
            database_path: data_dir.join("playlist.db"),
            cache_directory: cache_dir,
        }
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: PlayerConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Ok(Self::with_path(config_path))
    }

    /// Load from an explicit file, falling back to defaults
    pub fn with_path(config_path: PathBuf) -> Self {
        let config = match Self::load_config(&config_path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable configuration {}: {}",
                    config_path.display(),
                    e
                );
                PlayerConfig::default()
            }
        };

        Self {
            config,
            config_path,
        }
    }

    pub fn get_config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut PlayerConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.preferred_device = device;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = PlayerConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(APP_DIR);

        std::fs::create_dir_all(&config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<PlayerConfig, ConfigError> {
        if !path.exists() {
            return Ok(PlayerConfig::default());
        }

        let config_content = std::fs::read_to_string(path)?;
        let config: PlayerConfig = toml::from_str(&config_content)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let config_content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&self.config_path, config_content)?;

        Ok(())
    }
}
