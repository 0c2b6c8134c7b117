//! Configuration loading, validation, and management for chatdeck.
//!
//! Loads configuration from `~/.chatdeck/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for any simulated delay.
pub const MAX_DELAY_MS: u64 = 60_000;

const BACKENDS: &[&str] = &["sqlite", "in_memory"];

/// The root configuration structure.
///
/// Maps directly to `~/.chatdeck/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Conversation timing and canned content
    #[serde(default)]
    pub chat: ChatConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file. Defaults to `~/.chatdeck/chatdeck.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The database path to open, falling back to the config directory.
    pub fn resolved_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => expand_home(p),
            None => AppConfig::config_dir().join("chatdeck.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Delay before the welcome message is inserted into an empty conversation
    #[serde(default = "default_welcome_delay_ms")]
    pub welcome_delay_ms: u64,

    /// How long the assistant "thinks" before its reply is persisted
    #[serde(default = "default_thinking_delay_ms")]
    pub thinking_delay_ms: u64,

    /// How long a reply stays in the streaming state
    #[serde(default = "default_streaming_delay_ms")]
    pub streaming_delay_ms: u64,

    /// Maximum notices kept in view state
    #[serde(default = "default_max_notices")]
    pub max_notices: usize,

    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// Override the built-in welcome text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,

    /// Replace the built-in reply table. Evaluated top to bottom.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<ReplyRuleConfig>,

    /// Override the reply used when no rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reply: Option<String>,
}

fn default_welcome_delay_ms() -> u64 {
    500
}
fn default_thinking_delay_ms() -> u64 {
    1000
}
fn default_streaming_delay_ms() -> u64 {
    2000
}
fn default_max_notices() -> usize {
    20
}
fn default_assistant_name() -> String {
    "Assistant".into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            welcome_delay_ms: default_welcome_delay_ms(),
            thinking_delay_ms: default_thinking_delay_ms(),
            streaming_delay_ms: default_streaming_delay_ms(),
            max_notices: default_max_notices(),
            assistant_name: default_assistant_name(),
            welcome_message: None,
            replies: vec![],
            fallback_reply: None,
        }
    }
}

/// One row of a configured reply table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRuleConfig {
    /// Case-insensitive substrings; any match selects this rule
    pub keywords: Vec<String>,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_format() -> String {
    "pretty".into()
}
fn default_log_level() -> String {
    "warn".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatdeck/config.toml).
    ///
    /// Environment variables override the file:
    /// - `CHATDECK_STORE_BACKEND`
    /// - `CHATDECK_DB_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = lookup("CHATDECK_STORE_BACKEND") {
            self.store.backend = backend;
        }
        if let Some(path) = lookup("CHATDECK_DB_PATH") {
            self.store.path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatdeck")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be one of {BACKENDS:?}, got '{}'",
                self.store.backend
            )));
        }

        let delays = [
            ("welcome_delay_ms", self.chat.welcome_delay_ms),
            ("thinking_delay_ms", self.chat.thinking_delay_ms),
            ("streaming_delay_ms", self.chat.streaming_delay_ms),
        ];
        for (name, value) in delays {
            if value > MAX_DELAY_MS {
                return Err(ConfigError::ValidationError(format!(
                    "chat.{name} must be at most {MAX_DELAY_MS}"
                )));
            }
        }

        if self.chat.max_notices == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_notices must be at least 1".into(),
            ));
        }

        for (i, rule) in self.chat.replies.iter().enumerate() {
            if rule.response.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "chat.replies[{i}] has an empty response"
                )));
            }
            if !rule.keywords.iter().any(|k| !k.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "chat.replies[{i}] needs at least one non-empty keyword"
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(
                "logging.format must be 'pretty' or 'json'".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs_home().join(rest),
        None => PathBuf::from(path),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
