//! Configuration loading, validation, and management for Jarvis.
//!
//! Loads configuration from `~/.jarvis/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.jarvis/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent loop behaviour
    #[serde(default)]
    pub agent: AgentConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Speech services
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Built-in tools
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// How tool calls travel between the model and the agent loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolProtocol {
    /// `<tool_call>{...}</tool_call>` spans inside the text stream
    #[default]
    Inline,
    /// The backend's structured `tool_calls` field
    Native,
    /// Tools are not offered to the model
    None,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name, used for default endpoints ("vllm", "llamacpp", "ollama", "openai", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// OpenAI-compatible base URL; falls back to the provider's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub tool_protocol: ToolProtocol,

    /// Longest silence from the model backend, in seconds, before a request or
    /// stream is abandoned
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> String {
    "vllm".into()
}
fn default_model() -> String {
    "Qwen/Qwen3-8B".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tool_protocol", &self.tool_protocol)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            tool_protocol: ToolProtocol::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Upper bound on model rounds that end in tool calls within one turn.
    /// Unset means no bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,

    /// Skip a tool call identical to one already run in the same turn
    #[serde(default = "default_true")]
    pub dedupe_tool_calls: bool,

    /// Per-call tool time limit in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

fn default_system_prompt() -> String {
    "You are JARVIS, a helpful AI assistant.\n\
     Your goal is to assist the user with their requests in a helpful manner.\n\
     You should provide accurate and relevant information.\n\
     If you use a tool, interpret the results for the user naturally.\n\
     Keep your responses concise and to the point, avoiding unnecessary elaboration or disclaimers."
        .into()
}
fn default_true() -> bool {
    true
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_iterations: None,
            dedupe_tool_calls: true,
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8765
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where sessions live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite database file; defaults to `~/.jarvis/sessions.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("sessions.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Language assumed when the client sends none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,

    #[serde(default = "default_asr")]
    pub asr: SpeechEndpoint,

    #[serde(default = "default_tts")]
    pub tts: SpeechEndpoint,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_language: None,
            asr: default_asr(),
            tts: default_tts(),
        }
    }
}

/// An OpenAI-compatible audio endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SpeechEndpoint {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub model: String,

    /// TTS voice name; unused for ASR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

fn default_asr() -> SpeechEndpoint {
    SpeechEndpoint {
        enabled: false,
        base_url: "http://localhost:8000/v1".into(),
        api_key: None,
        model: "whisper-1".into(),
        voice: None,
    }
}

fn default_tts() -> SpeechEndpoint {
    SpeechEndpoint {
        enabled: false,
        base_url: "http://localhost:8880/v1".into(),
        api_key: None,
        model: "kokoro".into(),
        voice: Some("af_heart".into()),
    }
}

impl std::fmt::Debug for SpeechEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechEndpoint")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub calculator: bool,

    #[serde(default = "default_true")]
    pub datetime: bool,

    #[serde(default = "default_true")]
    pub weather: bool,

    #[serde(default = "default_true")]
    pub wikipedia: bool,

    /// Local time in other places
    #[serde(default = "default_true")]
    pub world_clock: bool,

    #[serde(default = "default_true")]
    pub currency: bool,

    /// Toy tool that adds two to an integer; handy for checking tool plumbing
    #[serde(default)]
    pub magic_function: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            calculator: true,
            datetime: true,
            weather: true,
            wikipedia: true,
            world_clock: true,
            currency: true,
            magic_function: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path with env var overrides.
    ///
    /// Priority: env vars > config file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_path())
    }

    /// Like [`AppConfig::load`], for a config file somewhere else.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides();
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

    fn apply_env_overrides(&mut self) {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("JARVIS_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(url) = std::env::var("JARVIS_LLM_URL") {
            self.llm.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("JARVIS_MODEL") {
            self.llm.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".jarvis")
    }

    /// The default config file, `~/.jarvis/config.toml`.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("llm.model must not be empty".into()));
        }
        if self.agent.max_tool_iterations == Some(0) {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1 when set".into(),
            ));
        }
        if self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_secs must be at least 1".into(),
            ));
        }
        for (section, endpoint) in [("voice.asr", &self.voice.asr), ("voice.tts", &self.voice.tts)] {
            if endpoint.enabled && endpoint.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{section}.base_url is required when enabled"
                )));
            }
        }
        Ok(())
    }

    /// Generate a default config TOML string (for `jarvis config --init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
