//! Configuration loading, validation, and management for Citeflow.
//!
//! Loads configuration from `~/.citeflow/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.citeflow/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion and moderation service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API (defaults to api.openai.com)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Completion model
    #[serde(default = "default_model")]
    pub model: String,

    /// Prompt budgeting and generation settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Per-session spending cap
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub pricing: HashMap<String, PricingOverrideConfig>,

    /// Reference corpus for the built-in retriever
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

/// Redact a secret string for Debug output.
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
            .field("model", &self.model)
            .field("chat", &self.chat)
            .field("budget", &self.budget)
            .field("pricing", &self.pricing)
            .field("retrieval", &self.retrieval)
            .finish()
    }
}

/// `[chat]` section.
///
/// `num_tokens` and `k` are derived from the model when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Total token window of the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_tokens: Option<usize>,

    /// Share of the window given to reference passages
    #[serde(default = "default_context_fraction")]
    pub context_fraction: f64,

    /// Share of the window given to conversation history
    #[serde(default = "default_history_fraction")]
    pub history_fraction: f64,

    /// Passages retrieved per query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,

    /// Tokens held back from the completion budget
    #[serde(default = "default_completion_margin")]
    pub completion_margin: usize,

    #[serde(default)]
    pub temperature: f32,

    /// Upper bound on every remote call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_context_fraction() -> f64 {
    0.5
}
fn default_history_fraction() -> f64 {
    0.25
}
fn default_completion_margin() -> usize {
    50
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            num_tokens: None,
            context_fraction: default_context_fraction(),
            history_fraction: default_history_fraction(),
            k: None,
            completion_margin: default_completion_margin(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// `[budget]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum spend per chat invocation in USD
    #[serde(default = "default_session_usd")]
    pub session_usd: f64,
}

fn default_session_usd() -> f64 {
    10.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            session_usd: default_session_usd(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// JSON file holding an array of reference passages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.citeflow/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CITEFLOW_API_KEY` (highest priority, overrides the file)
    /// - `OPENAI_API_KEY` (used only when no key is set elsewhere)
    /// - `CITEFLOW_MODEL`
    /// - `CITEFLOW_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env();
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

    fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// `CITEFLOW_API_KEY` beats the file; `OPENAI_API_KEY` only fills a gap.
    fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("CITEFLOW_API_KEY") {
            self.api_key = Some(key);
        } else if self.api_key.is_none() {
            self.api_key = var("OPENAI_API_KEY");
        }

        if let Some(model) = var("CITEFLOW_MODEL") {
            self.model = model;
        }

        if let Some(url) = var("CITEFLOW_BASE_URL") {
            self.api_url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".citeflow")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let chat = &self.chat;

        if !(0.0..=2.0).contains(&chat.temperature) {
            return Err(ConfigError::ValidationError(
                "chat.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, value) in [
            ("context_fraction", chat.context_fraction),
            ("history_fraction", chat.history_fraction),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::ValidationError(format!(
                    "chat.{name} must be within (0, 1)"
                )));
            }
        }

        if chat.context_fraction + chat.history_fraction > 1.0 {
            return Err(ConfigError::ValidationError(
                "chat.context_fraction + chat.history_fraction must be <= 1".into(),
            ));
        }

        if chat.num_tokens == Some(0) {
            return Err(ConfigError::ValidationError(
                "chat.num_tokens must be > 0".into(),
            ));
        }

        if chat.k == Some(0) {
            return Err(ConfigError::ValidationError("chat.k must be > 0".into()));
        }

        if chat.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chat.request_timeout_secs must be > 0".into(),
            ));
        }

        if !(self.budget.session_usd.is_finite() && self.budget.session_usd > 0.0) {
            return Err(ConfigError::ValidationError(
                "budget.session_usd must be > 0".into(),
            ));
        }

        for (model, price) in &self.pricing {
            if price.input_per_m < 0.0 || price.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "pricing for {model} must not be negative"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            model: default_model(),
            chat: ChatConfig::default(),
            budget: BudgetConfig::default(),
            pricing: HashMap::new(),
            retrieval: RetrievalConfig::default(),
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
