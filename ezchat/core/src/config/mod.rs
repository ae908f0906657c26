//! TOML Configuration File Support
//!
//! Centralized configuration loading for the chat client, supporting a TOML
//! configuration file at `~/.config/ezchat/client.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/ezchat/client.toml` (typically `~/.config/ezchat/client.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! endpoint = "http://localhost:8000"
//! chat_path = "/v1/chat/completions"
//! wire_format = "ndjson"
//!
//! [model]
//! default = "llama3.2"
//! system_prompt = "You are a concise assistant."
//!
//! [stream]
//! connect_timeout_ms = 5000
//! read_timeout_ms = 0
//! max_frame_bytes = 1048576
//! update_buffer = 256
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::WireFormat;
use crate::framing::DEFAULT_MAX_FRAME_BYTES;
use crate::pump::StreamOptions;

/// Environment variable names
pub mod env {
    /// Server base URL
    pub const ENDPOINT: &str = "EZCHAT_ENDPOINT";
    /// Chat completion path
    pub const CHAT_PATH: &str = "EZCHAT_CHAT_PATH";
    /// Response wire format
    pub const WIRE_FORMAT: &str = "EZCHAT_WIRE_FORMAT";
    /// Model identifier
    pub const MODEL: &str = "EZCHAT_MODEL";
    /// System prompt
    pub const SYSTEM_PROMPT: &str = "EZCHAT_SYSTEM_PROMPT";
    /// Connect timeout (ms)
    pub const CONNECT_TIMEOUT: &str = "EZCHAT_CONNECT_TIMEOUT";
    /// Idle read timeout (ms, 0 disables)
    pub const READ_TIMEOUT: &str = "EZCHAT_READ_TIMEOUT";
    /// Frame size limit (bytes)
    pub const MAX_FRAME_BYTES: &str = "EZCHAT_MAX_FRAME_BYTES";

    /// Every variable read by the loader
    pub const ALL: [&str; 8] = [
        ENDPOINT,
        CHAT_PATH,
        WIRE_FORMAT,
        MODEL,
        SYSTEM_PROMPT,
        CONNECT_TIMEOUT,
        READ_TIMEOUT,
        MAX_FRAME_BYTES,
    ];
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Base URL of the inference service
    pub endpoint: Option<String>,

    /// Path of the streaming chat endpoint
    pub chat_path: Option<String>,

    /// Response framing (`sse-text`, `sse-json`, `ndjson`, `raw`)
    pub wire_format: Option<WireFormat>,
}

/// `[model]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelToml {
    /// Model used when none has been selected
    pub default: Option<String>,

    /// Leading system message sent with every request
    pub system_prompt: Option<String>,
}

/// `[stream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Idle read timeout in milliseconds (0 = no timeout)
    pub read_timeout_ms: Option<u64>,

    /// Largest frame accepted without a delimiter
    pub max_frame_bytes: Option<usize>,

    /// Capacity of the turn update channel
    pub update_buffer: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server section
    pub server: ServerToml,

    /// Model section
    pub model: ModelToml,

    /// Stream section
    pub stream: StreamToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved client configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the inference service
    pub endpoint: String,

    /// Path of the streaming chat endpoint
    pub chat_path: String,

    /// Response framing
    pub wire_format: WireFormat,

    /// Model used when none has been selected
    pub default_model: Option<String>,

    /// Leading system message sent with every request
    pub system_prompt: Option<String>,

    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Idle read timeout in milliseconds (0 = no timeout)
    pub read_timeout_ms: u64,

    /// Largest frame accepted without a delimiter
    pub max_frame_bytes: usize,

    /// Capacity of the turn update channel
    pub update_buffer: usize,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            wire_format: WireFormat::Ndjson,
            default_model: None,
            system_prompt: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            update_buffer: 256,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Full URL of the chat endpoint
    #[must_use]
    pub fn chat_url(&self) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), self.chat_path)
    }

    /// Connection timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Idle read timeout, `None` when disabled
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Per-stream pump settings
    #[must_use]
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            wire_format: self.wire_format,
            read_timeout: self.read_timeout(),
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    /// Check values that would otherwise fail later at request time
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::ValidationError(format!("endpoint '{}': {e}", self.endpoint))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "endpoint '{}' must use http or https",
                self.endpoint
            )));
        }
        if !self.chat_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "chat_path '{}' must start with '/'",
                self.chat_path
            )));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_frame_bytes must be greater than 0".to_string(),
            ));
        }
        if self.update_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "update_buffer must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ezchat/client.toml` or
/// `~/.config/ezchat/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ezchat").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path plus the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment variables through `lookup`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup)?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref endpoint) = toml.server.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(ref path) = toml.server.chat_path {
        config.chat_path.clone_from(path);
    }
    if let Some(format) = toml.server.wire_format {
        config.wire_format = format;
    }

    if toml.model.default.is_some() {
        config.default_model.clone_from(&toml.model.default);
    }
    if toml.model.system_prompt.is_some() {
        config.system_prompt.clone_from(&toml.model.system_prompt);
    }

    if let Some(timeout) = toml.stream.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.stream.read_timeout_ms {
        config.read_timeout_ms = timeout;
    }
    if let Some(limit) = toml.stream.max_frame_bytes {
        config.max_frame_bytes = limit;
    }
    if let Some(buffer) = toml.stream.update_buffer {
        config.update_buffer = buffer;
    }
}

/// Apply environment variable overrides to the config
///
/// Unparseable numbers are ignored. An unknown wire format is an error.
fn apply_env_config<F>(config: &mut ClientConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup(env::ENDPOINT) {
        config.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup(env::CHAT_PATH) {
        config.chat_path = path;
        config.source = ConfigSource::Env;
    }
    if let Some(format) = lookup(env::WIRE_FORMAT) {
        config.wire_format = format
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("{}: {e}", env::WIRE_FORMAT)))?;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup(env::MODEL) {
        config.default_model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = lookup(env::SYSTEM_PROMPT) {
        config.system_prompt = Some(prompt);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup(env::CONNECT_TIMEOUT) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connect_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = lookup(env::READ_TIMEOUT) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.read_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(limit) = lookup(env::MAX_FRAME_BYTES) {
        if let Ok(bytes) = limit.parse::<usize>() {
            config.max_frame_bytes = bytes;
            config.source = ConfigSource::Env;
        }
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub endpoint: Option<String>,

    /// Wire format override
    pub wire_format: Option<WireFormat>,

    /// Model override
    pub default_model: Option<String>,

    /// System prompt override
    pub system_prompt: Option<String>,

    /// Read timeout override (milliseconds)
    pub read_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set wire format override
    #[must_use]
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = Some(format);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set system prompt override
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Set read timeout override
    #[must_use]
    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = Some(ms);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none()
            && self.wire_format.is_none()
            && self.default_model.is_none()
            && self.system_prompt.is_none()
            && self.read_timeout_ms.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref endpoint) = self.endpoint {
            config.endpoint.clone_from(endpoint);
        }
        if let Some(format) = self.wire_format {
            config.wire_format = format;
        }
        if let Some(ref model) = self.default_model {
            config.default_model = Some(model.clone());
        }
        if let Some(ref prompt) = self.system_prompt {
            config.system_prompt = Some(prompt.clone());
        }
        if let Some(ms) = self.read_timeout_ms {
            config.read_timeout_ms = ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
