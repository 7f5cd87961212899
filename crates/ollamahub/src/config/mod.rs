use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{HubError, Result};

/// Main configuration structure for OllamaHub
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP listener and surface configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Inference backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Model allow-list
    #[serde(default)]
    pub models: ModelsConfig,
    /// API key set
    #[serde(default)]
    pub auth: AuthConfig,
    /// Default sampling parameters filled into backend payloads
    #[serde(default)]
    pub sampling: SamplingDefaults,
    /// Streaming relay tuning
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Config {
    /// Read and parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HubError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| HubError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from an explicit path or the default search locations
    ///
    /// Search order when no path is given:
    /// `~/.ollamahub/config.toml`, `<config_dir>/ollamahub/config.toml`,
    /// `./config.toml`. Falls back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".ollamahub").join("config.toml")),
            dirs::config_dir().map(|c| c.join("ollamahub").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Check cross-field invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.models.available_models.is_empty() {
            return Err(HubError::Config(
                "models.available_models must list at least one model".to_string(),
            ));
        }

        if !self.models.is_allowed(&self.models.default_model) {
            return Err(HubError::Config(format!(
                "models.default_model '{}' is not in models.available_models {:?}",
                self.models.default_model, self.models.available_models
            )));
        }

        let url = Url::parse(&self.backend.url).map_err(|e| {
            HubError::Config(format!("Invalid backend URL '{}': {e}", self.backend.url))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(HubError::Config(format!(
                "Unsupported backend URL scheme '{}': only http and https are allowed",
                url.scheme()
            )));
        }

        if self.stream.channel_capacity == 0 {
            return Err(HubError::Config(
                "stream.channel_capacity must be greater than zero".to_string(),
            ));
        }

        if self.auth.api_keys.is_empty() {
            tracing::warn!("auth.api_keys is empty: every API request will be rejected");
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// API version string reported by `/health`
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Display name used in startup logs
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Directory holding `index.html` and static assets (disabled when unset)
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_version: default_api_version(),
            project_name: default_project_name(),
            static_dir: None,
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_api_version() -> String {
    "/api/v1".to_string()
}

fn default_project_name() -> String {
    "OllamaHub".to_string()
}

/// Inference backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama-compatible backend
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Total timeout for buffered calls, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TCP connect timeout, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum wait for a single read on a streaming response, in seconds
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

fn default_backend_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stream_idle_timeout_secs() -> u64 {
    120
}

/// Model allow-list configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Model used when a request omits `model`
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Models clients may request
    #[serde(default = "default_available_models")]
    pub available_models: Vec<String>,
}

impl ModelsConfig {
    /// Whether `model` is in the allow-list (exact match)
    pub fn is_allowed(&self, model: &str) -> bool {
        self.available_models.iter().any(|m| m == model)
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            available_models: default_available_models(),
        }
    }
}

fn default_model() -> String {
    "deepseek-r1:14b".to_string()
}

fn default_available_models() -> Vec<String> {
    vec![default_model()]
}

/// API key configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Key name → key value. Any listed value is accepted.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
}

impl AuthConfig {
    /// Return the name of the key matching `presented`, if any
    pub fn key_name(&self, presented: &str) -> Option<&str> {
        self.api_keys
            .iter()
            .find(|(_, key)| key.as_str() == presented)
            .map(|(name, _)| name.as_str())
    }
}

/// Backend sampling defaults for fields a request leaves out
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: i64,
    /// Maximum tokens to generate (-1 = unlimited)
    #[serde(default = "default_num_predict")]
    pub num_predict: i64,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub presence_penalty: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f64,
    #[serde(default = "default_tfs_z")]
    pub tfs_z: f64,
    /// Mirostat mode (0 = disabled, 1 = Mirostat, 2 = Mirostat 2.0)
    #[serde(default)]
    pub mirostat: i64,
    #[serde(default = "default_mirostat_tau")]
    pub mirostat_tau: f64,
    #[serde(default = "default_mirostat_eta")]
    pub mirostat_eta: f64,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            num_ctx: default_num_ctx(),
            num_predict: default_num_predict(),
            stop: Vec::new(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repeat_penalty: default_repeat_penalty(),
            tfs_z: default_tfs_z(),
            mirostat: 0,
            mirostat_tau: default_mirostat_tau(),
            mirostat_eta: default_mirostat_eta(),
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_top_k() -> i64 {
    40
}

fn default_num_ctx() -> i64 {
    4096
}

fn default_num_predict() -> i64 {
    -1
}

fn default_repeat_penalty() -> f64 {
    1.1
}

fn default_tfs_z() -> f64 {
    1.0
}

fn default_mirostat_tau() -> f64 {
    5.0
}

fn default_mirostat_eta() -> f64 {
    0.1
}

/// Streaming relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Chunks buffered between the relay task and the client body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Largest unterminated object the framer will hold before discarding it
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_channel_capacity() -> usize {
    32
}

// An unfinished object is re-parsed from its start each time a read brings a
// closing brace, so this also caps the work per read.
fn default_max_frame_bytes() -> usize {
    1024 * 1024
}
