//! Yapsbot configuration system.
//!
//! Loaded from `~/.yapsbot/config.toml` (every field has a default), then
//! overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, YapsError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YapsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub kaito: KaitoConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl YapsConfig {
    /// Load config from the default path (~/.yapsbot/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| YapsError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| YapsError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| YapsError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process env in production).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
            tracing::debug!("🔧 Telegram token taken from TELEGRAM_TOKEN");
        }
        if let Some(minutes) = lookup("CHECK_INTERVAL_MINUTES") {
            self.tracking.interval_minutes = minutes.trim().parse().map_err(|e| {
                YapsError::Config(format!("invalid CHECK_INTERVAL_MINUTES '{minutes}': {e}"))
            })?;
            tracing::debug!(
                "🔧 Check interval set to {} minutes from CHECK_INTERVAL_MINUTES",
                self.tracking.interval_minutes
            );
        }
        if let Some(url) = lookup("KAITO_API_URL").filter(|u| !u.is_empty()) {
            tracing::debug!("🔧 Kaito API URL set to {url} from KAITO_API_URL");
            self.kaito.api_url = url;
        }
        if let Some(path) = lookup("YAPSBOT_DB_PATH").filter(|p| !p.is_empty()) {
            tracing::debug!("🔧 Database path set to {path} from YAPSBOT_DB_PATH");
            self.database.path = path;
        }
        Ok(())
    }

    /// Check the values the bot cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(YapsError::Config(
                "TELEGRAM_TOKEN is not set (env or [telegram].bot_token)".into(),
            ));
        }
        self.tracking.validate()
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the yapsbot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".yapsbot")
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Seconds to sleep between getUpdates calls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Long-poll timeout passed to getUpdates.
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout: u64,
}

fn default_poll_interval() -> u64 { 1 }
fn default_long_poll_timeout() -> u64 { 30 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_interval: default_poll_interval(),
            long_poll_timeout: default_long_poll_timeout(),
        }
    }
}

/// Kaito Yaps API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KaitoConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String { "https://api.kaito.ai/api/v1/yaps".into() }
fn default_timeout_secs() -> u64 { 15 }

impl Default for KaitoConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Tracking loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_interval_minutes() -> u64 { 60 }
fn default_batch_size() -> usize { 5 }
fn default_batch_delay_ms() -> u64 { 2000 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl TrackingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(YapsError::Config("tracking.batch_size must be at least 1".into()));
        }
        if self.interval_minutes == 0 {
            return Err(YapsError::Config(
                "tracking.interval_minutes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// SQLite store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.yapsbot/yapsbot.sqlite".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    /// Path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}
