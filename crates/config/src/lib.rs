//! Configuration loading, validation, and management for taskpilot.
//!
//! Loads configuration from `~/.taskpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.taskpilot/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model identifier reported to the provider
    #[serde(default = "default_model")]
    pub default_model: String,

    /// System prompt sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Task session loop tunables
    #[serde(default)]
    pub task: TaskConfig,

    /// Executor pipeline middleware settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Task persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

/// Heuristics of the task session loop. These are tunables, not protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Token budget of a single request; drives truncation
    #[serde(default = "default_context_window")]
    pub context_window: u64,

    /// Consecutive mistakes before the operator is asked whether to proceed
    #[serde(default = "default_max_mistakes")]
    pub max_consecutive_mistakes: u32,

    /// Push a "use a tool" notice when a turn ends without a tool call
    #[serde(default = "default_true")]
    pub require_tool_use: bool,

    /// Resubmit first-chunk failures without asking
    #[serde(default)]
    pub auto_retry_requests: bool,

    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,

    /// Base delay for exponential backoff between automatic retries
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,

    /// Command types executed without an approval ask
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve: Vec<String>,

    /// Skip approval asks entirely
    #[serde(default)]
    pub auto_approve_all: bool,
}

fn default_context_window() -> u64 {
    128_000
}
fn default_max_mistakes() -> u32 {
    3
}
fn default_max_auto_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    2
}
fn default_true() -> bool {
    true
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_consecutive_mistakes: default_max_mistakes(),
            require_tool_use: true,
            auto_retry_requests: false,
            max_auto_retries: default_max_auto_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            auto_approve: vec![],
            auto_approve_all: false,
        }
    }
}

impl TaskConfig {
    /// Usage total at which the API history is truncated before the next request.
    pub fn truncation_threshold(&self) -> u64 {
        let window = self.context_window;
        let reserved = window.saturating_sub(40_000);
        let ratio = (window as f64 * 0.8) as u64;
        reserved.max(ratio)
    }

    /// Whether a command type runs without asking.
    pub fn is_auto_approved(&self, kind: &str) -> bool {
        self.auto_approve_all || self.auto_approve.iter().any(|k| k == kind)
    }
}

/// Which middlewares wrap command execution and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_true")]
    pub logging: bool,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_retry_max")]
    pub retry_max: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub performance: bool,
}

fn default_cache_ttl() -> u64 {
    60
}
fn default_retry_max() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            logging: true,
            cache_ttl_secs: default_cache_ttl(),
            retry_max: default_retry_max(),
            retry_delay_ms: default_retry_delay_ms(),
            performance: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "file" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Root directory for the file backend (defaults to ~/.taskpilot/tasks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "file".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            dir: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("tasks"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.taskpilot/config.toml).
    ///
    /// Environment overrides:
    /// - `TASKPILOT_MODEL`
    /// - `TASKPILOT_CONTEXT_WINDOW`
    /// - `TASKPILOT_STORE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(model) = std::env::var("TASKPILOT_MODEL") {
            self.default_model = model;
        }

        if let Ok(window) = std::env::var("TASKPILOT_CONTEXT_WINDOW") {
            self.task.context_window = window.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TASKPILOT_CONTEXT_WINDOW must be an integer, got '{window}'"
                ))
            })?;
        }

        if let Ok(dir) = std::env::var("TASKPILOT_STORE_DIR") {
            self.storage.dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskpilot")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.task.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "task.context_window must be > 0".into(),
            ));
        }

        if self.task.max_consecutive_mistakes == 0 {
            return Err(ConfigError::ValidationError(
                "task.max_consecutive_mistakes must be >= 1".into(),
            ));
        }

        if self.executor.cache_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "executor.cache_ttl_secs must be > 0".into(),
            ));
        }

        if !matches!(self.storage.backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "storage.backend must be 'file' or 'memory', got '{}'",
                self.storage.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            system_prompt: None,
            task: TaskConfig::default(),
            executor: ExecutorConfig::default(),
            storage: StorageConfig::default(),
        }
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
