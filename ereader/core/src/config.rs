//! TOML Configuration File Support
//!
//! Centralized configuration loading for ereader surfaces, backed by a TOML
//! file at `~/.config/ereader/ereader.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! kind = "socket"
//! endpoint = "wss://reader.example/api/ws"
//! connect_timeout_ms = 30000
//! reconnect_attempts = 3
//! reconnect_interval_ms = 2000
//!
//! [api]
//! base_url = "https://reader.example/api"
//! timeout_ms = 10000
//!
//! [generation]
//! max_length = 800
//! style = "continue"
//! context_chars = 100
//! max_file_size = 52428800
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{GenerationRequest, GenerationStyle, DEFAULT_MAX_LENGTH};
use crate::transport::{TransportConfig, TransportType};

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

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// "stream" or "socket"
    pub kind: Option<TransportType>,

    /// Generation endpoint URL
    pub endpoint: Option<String>,

    /// Socket connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Number of reconnection attempts
    pub reconnect_attempts: Option<u32>,

    /// Base reconnection interval in milliseconds
    pub reconnect_interval_ms: Option<u64>,

    /// Stream request timeout in milliseconds (0 = none)
    pub request_timeout_ms: Option<u64>,
}

/// API section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Base URL of the tag catalog and status API
    pub base_url: Option<String>,

    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

/// Generation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Maximum generated length
    pub max_length: Option<u32>,

    /// Default generation style
    pub style: Option<GenerationStyle>,

    /// Characters of context taken before the click position
    pub context_chars: Option<usize>,

    /// Largest document accepted, in bytes
    pub max_file_size: Option<u64>,

    /// Character extraction limit sent with each request
    pub character_limit: Option<u32>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderToml {
    /// Transport configuration section
    pub transport: TransportToml,

    /// API configuration section
    pub api: ApiToml,

    /// Generation configuration section
    pub generation: GenerationToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Defaults applied to every generation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationSettings {
    /// Maximum generated length
    pub max_length: u32,
    /// Generation style
    pub style: GenerationStyle,
    /// Characters of context taken before the click position
    pub context_chars: usize,
    /// Largest document accepted, in bytes
    pub max_file_size: u64,
    /// Character extraction limit, if any
    pub character_limit: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            style: GenerationStyle::Continue,
            context_chars: 100,
            max_file_size: crate::document::MAX_FILE_SIZE,
            character_limit: None,
        }
    }
}

impl GenerationSettings {
    /// Build a request for `content` with these settings
    pub fn request<I, S>(&self, content: impl Into<String>, tags: I) -> GenerationRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        let mut request = GenerationRequest::new(content)
            .with_max_length(self.max_length)
            .with_style(self.style);
        if !tags.is_empty() {
            request = request.with_tags(tags);
        }
        if let Some(limit) = self.character_limit {
            request = request.with_character_limit(limit);
        }
        request
    }
}

/// Centralized configuration for an ereader surface
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Generation transport configuration
    pub transport: TransportConfig,

    /// Base URL of the tag catalog and status API
    pub api_base_url: Option<String>,

    /// Timeout for tag catalog and status requests
    pub api_timeout: Duration,

    /// Request defaults
    pub generation: GenerationSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            api_base_url: None,
            api_timeout: Duration::from_secs(10),
            generation: GenerationSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ReaderConfig {
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

    /// Check values that would otherwise fail late
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref endpoint) = self.transport.endpoint {
            let allowed: &[&str] = match self.transport.transport {
                TransportType::Stream => &["http://", "https://"],
                TransportType::Socket => &["ws://", "wss://", "http://", "https://"],
            };
            if !allowed.iter().any(|scheme| endpoint.starts_with(scheme)) {
                return Err(ConfigError::ValidationError(format!(
                    "endpoint {endpoint} has an unsupported scheme for the {:?} transport",
                    self.transport.transport
                )));
            }
        }
        if self.generation.max_length == 0 {
            return Err(ConfigError::ValidationError(
                "max_length must be greater than zero".into(),
            ));
        }
        if self.generation.context_chars == 0 {
            return Err(ConfigError::ValidationError(
                "context_chars must be greater than zero".into(),
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
/// Returns `$XDG_CONFIG_HOME/ereader/ereader.toml` or
/// `~/.config/ereader/ereader.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ereader").join("ereader.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ReaderConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ReaderConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration resolving environment variables through `var`
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env(
    path: Option<PathBuf>,
    var: impl Fn(&str) -> Option<String>,
) -> Result<ReaderConfig, ConfigError> {
    let mut config = ReaderConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ReaderToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, &var);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ReaderConfig, toml: &ReaderToml) {
    // Transport settings
    if let Some(kind) = toml.transport.kind {
        config.transport.transport = kind;
    }
    if toml.transport.endpoint.is_some() {
        config.transport.endpoint = toml.transport.endpoint.clone();
    }
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if let Some(attempts) = toml.transport.reconnect_attempts {
        config.transport.reconnect_attempts = attempts;
    }
    if let Some(interval) = toml.transport.reconnect_interval_ms {
        config.transport.reconnect_interval_ms = interval;
    }
    if let Some(timeout) = toml.transport.request_timeout_ms {
        config.transport.request_timeout_ms = timeout;
    }

    // API settings
    if toml.api.base_url.is_some() {
        config.api_base_url = toml.api.base_url.clone();
    }
    if let Some(timeout) = toml.api.timeout_ms {
        config.api_timeout = Duration::from_millis(timeout);
    }

    // Generation settings
    if let Some(max_length) = toml.generation.max_length {
        config.generation.max_length = max_length;
    }
    if let Some(style) = toml.generation.style {
        config.generation.style = style;
    }
    if let Some(chars) = toml.generation.context_chars {
        config.generation.context_chars = chars;
    }
    if let Some(size) = toml.generation.max_file_size {
        config.generation.max_file_size = size;
    }
    if toml.generation.character_limit.is_some() {
        config.generation.character_limit = toml.generation.character_limit;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ReaderConfig, var: &impl Fn(&str) -> Option<String>) {
    if config.transport.apply_env_with(var) {
        config.source = ConfigSource::Env;
    }

    if let Some(url) = var("EREADER_API_URL") {
        config.api_base_url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(max_length) = var("EREADER_MAX_LENGTH").and_then(|v| v.parse().ok()) {
        config.generation.max_length = max_length;
        config.source = ConfigSource::Env;
    }
    if let Some(style) = var("EREADER_STYLE").and_then(|v| v.parse().ok()) {
        config.generation.style = style;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Transport kind override
    pub transport: Option<TransportType>,

    /// Endpoint override
    pub endpoint: Option<String>,

    /// API base URL override
    pub api_base_url: Option<String>,

    /// Max length override
    pub max_length: Option<u32>,

    /// Style override
    pub style: Option<GenerationStyle>,

    /// Context size override
    pub context_chars: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transport kind override
    #[must_use]
    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set API base URL override
    #[must_use]
    pub fn with_api_base_url(mut self, url: String) -> Self {
        self.api_base_url = Some(url);
        self
    }

    /// Set max length override
    #[must_use]
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set style override
    #[must_use]
    pub fn with_style(mut self, style: GenerationStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Set context size override
    #[must_use]
    pub fn with_context_chars(mut self, chars: usize) -> Self {
        self.context_chars = Some(chars);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transport.is_none()
            && self.endpoint.is_none()
            && self.api_base_url.is_none()
            && self.max_length.is_none()
            && self.style.is_none()
            && self.context_chars.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ReaderConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(transport) = self.transport {
            config.transport.transport = transport;
        }
        if let Some(ref endpoint) = self.endpoint {
            config.transport.endpoint = Some(endpoint.clone());
        }
        if let Some(ref url) = self.api_base_url {
            config.api_base_url = Some(url.clone());
        }
        if let Some(max_length) = self.max_length {
            config.generation.max_length = max_length;
        }
        if let Some(style) = self.style {
            config.generation.style = style;
        }
        if let Some(chars) = self.context_chars {
            config.generation.context_chars = chars;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();

        assert_eq!(config.transport.transport, TransportType::Stream);
        assert!(config.api_base_url.is_none());
        assert_eq!(config.generation.max_length, 800);
        assert_eq!(config.generation.style, GenerationStyle::Continue);
        assert_eq!(config.generation.context_chars, 100);
        assert_eq!(config.generation.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("ereader"));
            assert!(p.to_string_lossy().ends_with("ereader.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[transport]
kind = "socket"
endpoint = "ws://127.0.0.1:3000/api/ws"
reconnect_attempts = 5
reconnect_interval_ms = 500

[api]
base_url = "http://127.0.0.1:3000/api"
timeout_ms = 2500

[generation]
max_length = 1200
style = "expand"
context_chars = 250
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert!(config.transport.is_socket());
        assert_eq!(
            config.transport.endpoint.as_deref(),
            Some("ws://127.0.0.1:3000/api/ws")
        );
        assert_eq!(config.transport.reconnect_attempts, 5);
        assert_eq!(config.transport.reconnect_interval_ms, 500);
        assert_eq!(config.api_base_url.as_deref(), Some("http://127.0.0.1:3000/api"));
        assert_eq!(config.api_timeout, Duration::from_millis(2500));
        assert_eq!(config.generation.max_length, 1200);
        assert_eq!(config.generation.style, GenerationStyle::Expand);
        assert_eq!(config.generation.context_chars, 250);
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml("[generation]\nmax_length = 400\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.generation.max_length, 400);
        assert_eq!(config.generation.context_chars, 100);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let config = load_config_with_env(
            Some(PathBuf::from("/nonexistent/ereader/ereader.toml")),
            no_env,
        )
        .unwrap();

        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[transport\nkind = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_style_is_parse_error() {
        let file = write_toml("[generation]\nstyle = \"summarize\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[transport]\nendpoint = \"http://file/stream\"\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), |name| match name {
            "EREADER_ENDPOINT" => Some("http://env/stream".into()),
            "EREADER_STYLE" => Some("variation".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.transport.endpoint.as_deref(), Some("http://env/stream"));
        assert_eq!(config.generation.style, GenerationStyle::Variation);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = load_config_with_env(None, |name| match name {
            "EREADER_MAX_LENGTH" => Some("300".into()),
            _ => None,
        })
        .unwrap();

        ConfigOverrides::new().with_max_length(900).apply(&mut config);

        assert_eq!(config.generation.max_length, 900);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = ReaderConfig::default();
        let overrides = ConfigOverrides::new();
        assert!(overrides.is_empty());

        overrides.apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation_rejects_bad_scheme() {
        let mut config = ReaderConfig::default();
        config.transport.endpoint = Some("ws://host/stream".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.transport.transport = TransportType::Socket;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_context() {
        let mut config = ReaderConfig::default();
        config.generation.context_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_build_request() {
        let settings = GenerationSettings {
            character_limit: Some(5),
            ..Default::default()
        };

        let request = settings.request("context", ["romance"]);
        assert_eq!(request.max_length, Some(800));
        assert_eq!(request.style, Some(GenerationStyle::Continue));
        assert_eq!(request.tags, Some(vec!["romance".to_string()]));
        assert_eq!(request.character_limit, Some(5));

        let untagged = settings.request("context", Vec::<String>::new());
        assert!(untagged.tags.is_none());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
