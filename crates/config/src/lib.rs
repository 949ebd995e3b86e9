//! Configuration loading, validation, and management for deskloop.
//!
//! Loads configuration from `~/.deskloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.deskloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,
}

fn default_base_url() -> String {
    "https://api.opentyphoon.ai/v1".into()
}
fn default_model() -> String {
    "typhoon-v2.5-30b-a3b-instruct".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
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
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("streaming", &self.streaming)
            .field("documents", &self.documents)
            .finish()
    }
}

/// Execution loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Decision steps allowed per run before it is force-terminated
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Replaces the built-in support-assistant instructions when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> usize {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS origins. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Drain settings for streaming runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// How long one wait on the event inbox lasts before re-checking the run
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a stream that produces nothing for this long
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}
fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Document search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,

    /// Upper bound on characters per indexed chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Results returned per search
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_chunk_size() -> usize {
    1000
}
fn default_top_k() -> usize {
    3
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
            chunk_size: default_chunk_size(),
            top_k: default_top_k(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.deskloop/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `DESKLOOP_API_KEY` (then `OPENAI_API_KEY`)
    /// - `DESKLOOP_BASE_URL`, `DESKLOOP_MODEL`, `DESKLOOP_TEMPERATURE`
    /// - `DESKLOOP_MAX_ITERATIONS`, `DESKLOOP_DOCUMENTS_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
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

    /// Apply overrides from a variable lookup (the process environment in
    /// [`AppConfig::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("DESKLOOP_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("DESKLOOP_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = lookup("DESKLOOP_MODEL") {
            self.model = model;
        }
        if let Some(raw) = lookup("DESKLOOP_TEMPERATURE") {
            self.temperature = parse_override("DESKLOOP_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = lookup("DESKLOOP_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_override("DESKLOOP_MAX_ITERATIONS", &raw)?;
        }
        if let Some(dir) = lookup("DESKLOOP_DOCUMENTS_DIR") {
            self.documents.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deskloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.streaming.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.poll_interval_ms must be > 0".into(),
            ));
        }

        if self.documents.chunk_size == 0 || self.documents.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "documents.chunk_size and documents.top_k must be > 0".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The effective configuration as TOML, with the API key redacted.
    pub fn to_redacted_toml(&self) -> String {
        let mut shown = self.clone();
        if shown.api_key.is_some() {
            shown.api_key = Some("[REDACTED]".into());
        }
        toml::to_string_pretty(&shown).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            gateway: GatewayConfig::default(),
            streaming: StreamingConfig::default(),
            documents: DocumentsConfig::default(),
        }
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{name} has an invalid value: {raw:?}")))
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
