//! Configuration management for Castline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

pub const CONFIG_ENV: &str = "CASTLINE_CONFIG";
pub const DB_PATH_ENV: &str = "CASTLINE_DB_PATH";
pub const OWNER_ENV: &str = "CASTLINE_OWNER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/castline/castline.db".to_string(),
        }
    }
}

/// Worker pool and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
    pub adapter_timeout_secs: u64,
    /// How long completed jobs are kept; 0 keeps them forever
    pub completed_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            backoff_ms: 5_000,
            poll_interval_ms: 1_000,
            lease_secs: 300,
            adapter_timeout_secs: 30,
            completed_retention_secs: 7 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub api_base: String,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub twitter: PlatformConfig,
    pub linkedin: PlatformConfig,
    pub instagram: PlatformConfig,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            twitter: PlatformConfig {
                enabled: true,
                api_base: "https://api.x.com".to_string(),
            },
            linkedin: PlatformConfig {
                enabled: true,
                api_base: "https://api.linkedin.com".to_string(),
            },
            instagram: PlatformConfig {
                enabled: true,
                api_base: "https://graph.facebook.com/v19.0".to_string(),
            },
        }
    }
}

impl PlatformsConfig {
    pub fn get(&self, platform: PlatformId) -> &PlatformConfig {
        match platform {
            PlatformId::Twitter => &self.twitter,
            PlatformId::LinkedIn => &self.linkedin,
            PlatformId::Instagram => &self.instagram,
        }
    }
}

/// Content generation provider (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub text_model: String,
    pub image_model: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            text_model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file at the default location yields the built-in defaults;
    /// a missing file named by `CASTLINE_CONFIG` is an error.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_ENV).is_ok();
        let config_path = resolve_config_path()?;

        let mut config = if !explicit && !config_path.exists() {
            Self::default_config()
        } else {
            Self::load_from_path(&config_path)?
        };

        if let Ok(db_path) = std::env::var(DB_PATH_ENV) {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("castline").join("config.toml"))
}

/// Expand `~` in a database path
pub fn resolve_db_path(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}
