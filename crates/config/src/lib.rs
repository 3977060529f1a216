//! Configuration loading, validation, and management for ecotrace.
//!
//! Loads configuration from `~/.ecotrace/config.toml` with environment
//! variable overrides. Validates all settings at load time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.ecotrace/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the scoring service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the scoring service
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Deployment environment stamped onto every record (e.g. "production")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Score every record inline instead of through the dispatch queue
    #[serde(default)]
    pub sync_mode: bool,

    /// Default attribution for every usage record
    #[serde(default)]
    pub attribution: AttributionConfig,

    /// Background dispatch queue settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Waiting behaviour for pending results
    #[serde(default)]
    pub wait: WaitConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_api_url() -> String {
    "https://api.ecotrace.dev".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("environment", &self.environment)
            .field("sync_mode", &self.sync_mode)
            .field("attribution", &self.attribution)
            .field("dispatch", &self.dispatch)
            .field("wait", &self.wait)
            .field("http", &self.http)
            .finish()
    }
}

/// Identifiers inherited by every record unless a trace or the record
/// itself overrides them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of queued scoring jobs
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// How long `shutdown` waits for queued jobs to finish
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

fn default_capacity() -> usize {
    100
}
fn default_flush_timeout_ms() -> u64 {
    2000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Polling cadence for async waits
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    50
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ecotrace/config.toml),
    /// then apply `ECOTRACE_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup` (highest priority).
    ///
    /// - `ECOTRACE_API_KEY`, `ECOTRACE_API_URL`, `ECOTRACE_ENVIRONMENT`
    /// - `ECOTRACE_SYNC_MODE` (`1`, `true`, `yes`, `on`)
    /// - `ECOTRACE_CLIENT_ID`, `ECOTRACE_PROJECT_ID`, `ECOTRACE_APPLICATION_ID`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ECOTRACE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("ECOTRACE_API_URL") {
            self.api_url = url;
        }
        if let Some(env) = lookup("ECOTRACE_ENVIRONMENT") {
            self.environment = Some(env);
        }
        if let Some(flag) = lookup("ECOTRACE_SYNC_MODE") {
            self.sync_mode = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(id) = lookup("ECOTRACE_CLIENT_ID") {
            self.attribution.client_id = Some(id);
        }
        if let Some(id) = lookup("ECOTRACE_PROJECT_ID") {
            self.attribution.project_id = Some(id);
        }
        if let Some(id) = lookup("ECOTRACE_APPLICATION_ID") {
            self.attribution.application_id = Some(id);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ecotrace")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }

        if self.dispatch.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.capacity must be > 0".into(),
            ));
        }

        if self.wait.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "wait.poll_interval_ms must be > 0".into(),
            ));
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "http.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Fail unless an API key is available.
    pub fn require_credentials(&self) -> Result<&str, ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingCredentials(
                "set api_key in config.toml or ECOTRACE_API_KEY".into(),
            )),
        }
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.require_credentials().is_ok()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            environment: None,
            sync_mode: false,
            attribution: AttributionConfig::default(),
            dispatch: DispatchConfig::default(),
            wait: WaitConfig::default(),
            http: HttpConfig::default(),
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

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}
