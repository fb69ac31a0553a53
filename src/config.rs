//! Configuration types for the task engine.
//!
//! [`AppConfig`] is the persisted application configuration (TOML on disk,
//! written by the settings UI, only read by the engine). [`RunConfig`] is the
//! immutable per-run snapshot handed to the run controller, and
//! [`AdvancedOptions`] carries the per-run automation flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable per-run parameter snapshot.
///
/// Created when a run is requested and owned by the run controller for the
/// run's lifetime. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Base URL of the model endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key for the model endpoint.
    pub api_key: String,
    /// Maximum number of agent steps per run.
    pub max_steps: u32,
    /// Interaction language (`cn` or `en`).
    pub language: String,
    /// Device control transport (`adb`, `hdc`, `ios`).
    pub device_type: String,
    /// Device identifier (empty = auto-detect / default device).
    pub device_id: String,
    /// WebDriverAgent URL (iOS only).
    pub wda_url: String,
}

/// Per-run automation flags. Supplied at run start; immutable during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    /// Wake the device before the task starts.
    pub auto_wake: bool,
    /// Lock the device after the task finishes.
    pub auto_lock: bool,
    /// Force-stop the target app before and after the task.
    pub auto_kill_app: bool,
    /// Package name used by `auto_kill_app`.
    pub app_package: String,
    /// Retry failed task logic.
    pub retry_enabled: bool,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Seconds to wait between retries.
    pub retry_interval_secs: u64,
    /// Answer pending prompts automatically (bounded by the retry budget).
    pub auto_answer: bool,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            auto_wake: false,
            auto_lock: false,
            auto_kill_app: false,
            app_package: String::new(),
            retry_enabled: false,
            max_retries: 3,
            retry_interval_secs: 60,
            auto_answer: false,
        }
    }
}

/// Persisted schedule settings (mode + both mode's fields; the inactive
/// mode's values are retained for display).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// `interval` or `specific_time`.
    pub mode: ScheduleMode,
    /// Interval in minutes (interval mode).
    pub interval_minutes: u32,
    /// Hour of day, 0-23 (specific-time mode).
    pub hour: u8,
    /// Minute of hour, 0-59 (specific-time mode).
    pub minute: u8,
    /// Whether scheduled execution is enabled.
    pub enabled: bool,
}

/// Which schedule field set is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Fire every N minutes.
    #[default]
    Interval,
    /// Fire once daily at a fixed wall-clock time.
    SpecificTime,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Interval,
            interval_minutes: 60,
            hour: 8,
            minute: 0,
            enabled: false,
        }
    }
}

/// Persisted application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the model endpoint.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key for the model endpoint.
    pub api_key: String,
    /// Default task text used when a start request carries no task.
    pub default_prompt: String,
    /// Maximum number of agent steps per run.
    pub max_steps: u32,
    /// Interaction language (`cn` or `en`).
    pub language: String,
    /// Device control transport (`adb`, `hdc`, `ios`).
    pub device_type: String,
    /// Device identifier (empty = default device).
    pub device_id: String,
    /// WebDriverAgent URL (iOS only).
    pub wda_url: String,
    /// Scheduled-execution settings.
    pub schedule: ScheduleSettings,
    /// Per-run automation flags.
    pub advanced: AdvancedOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_owned(),
            model: "autoglm-phone-9b".to_owned(),
            api_key: "EMPTY".to_owned(),
            default_prompt: String::new(),
            max_steps: 100,
            language: "cn".to_owned(),
            device_type: "adb".to_owned(),
            device_id: String::new(),
            wda_url: "http://localhost:8100".to_owned(),
            schedule: ScheduleSettings::default(),
            advanced: AdvancedOptions::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AgentError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AgentError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/phonepilot/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("phonepilot").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("phonepilot")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/phonepilot-config/config.toml")
        }
    }

    /// Build the immutable per-run snapshot from the current settings.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            max_steps: self.max_steps,
            language: self.language.clone(),
            device_type: self.device_type.clone(),
            device_id: self.device_id.clone(),
            wda_url: self.wda_url.clone(),
        }
    }

    /// Resolve the task text for a start request, falling back to the
    /// configured default prompt when the request carries no task.
    ///
    /// # Errors
    ///
    /// Returns a config error when both the request and the default prompt
    /// are empty.
    pub fn resolve_task(&self, requested: &str) -> crate::error::Result<String> {
        let task = requested.trim();
        if !task.is_empty() {
            return Ok(task.to_owned());
        }
        let fallback = self.default_prompt.trim();
        if !fallback.is_empty() {
            return Ok(fallback.to_owned());
        }
        Err(crate::error::AgentError::Config(
            "no task text and no default prompt configured".to_owned(),
        ))
    }
}
