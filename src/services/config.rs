use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConsoleError, Result};

/// Environment variable prefix for overrides, e.g. `KEYEZ__BACKEND__BASE_URL`.
const ENV_PREFIX: &str = "KEYEZ";

/// Backend REST settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "https://keyez-dev.descube.in/api".to_string(),
            timeout_secs: 10,
        }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Realtime push source settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// When false the console runs on backend history only.
    pub enabled: bool,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Reconciliation and send settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatSettings {
    /// How long after a placeholder's creation a realtime echo may still retire it.
    pub confirmation_window_ms: u64,
    /// Tolerated lead of the realtime clock over the local clock.
    pub clock_skew_ms: u64,
    /// Max outgoing message size in bytes.
    pub max_message_size: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            confirmation_window_ms: 5_000,
            clock_skew_ms: 1_000,
            max_message_size: 4_096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete console configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendSettings,
    pub realtime: RealtimeSettings,
    pub chat: ChatSettings,
    pub logging: LoggingSettings,
}

/// Loads and saves [`AppConfig`].
///
/// Layering: built-in defaults, then the TOML file (optional), then
/// `KEYEZ__SECTION__KEY` environment variables.
pub struct ConfigService {
    config: AppConfig,
    path: PathBuf,
}

impl ConfigService {
    /// Load from the default location, falling back to defaults on error.
    pub fn new() -> Self {
        let path = Self::default_path();
        match Self::load_from(&path) {
            Ok(service) => service,
            Err(e) => {
                log::warn!("Failed to load config from {:?}: {}. Using defaults.", path, e);
                Self {
                    config: AppConfig::default(),
                    path,
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())
            .map_err(|e| ConsoleError::ConfigError(format!("Build defaults: {}", e)))?;

        let config: AppConfig = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConsoleError::ConfigError(format!("Load {:?}: {}", path, e)))?;

        log::info!(
            "Loaded config: backend={}, realtime enabled={}",
            config.backend.base_url,
            config.realtime.enabled
        );

        Ok(Self {
            config,
            path: path.to_path_buf(),
        })
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("keyez-admin").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".keyez-admin/config.toml"))
    }

    pub fn get(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the configuration and write it back as TOML.
    pub fn update(&mut self, config: AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConsoleError::ConfigError(format!("Create config dir: {}", e)))?;
        }
        let data = toml::to_string_pretty(&config)
            .map_err(|e| ConsoleError::ConfigError(format!("Serialize config: {}", e)))?;
        std::fs::write(&self.path, data)
            .map_err(|e| ConsoleError::ConfigError(format!("Write config: {}", e)))?;
        self.config = config;
        Ok(())
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}
