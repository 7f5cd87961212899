//! Backend request payloads and normalized results
//!
//! The two payload shapes are a fixed backend contract: `/api/generate`
//! takes sampling fields at the top level, `/api/chat` nests them under
//! `options`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::BackendError;
use crate::config::SamplingDefaults;

/// Which backend operation a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Generate,
}

impl Mode {
    /// Backend path, relative to the base URL
    pub fn endpoint(self) -> &'static str {
        match self {
            Mode::Chat => "api/chat",
            Mode::Generate => "api/generate",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Generate => "generate",
        }
    }

    /// Pull the delta text out of one backend object for this mode
    ///
    /// Generate objects carry `response`; chat objects carry
    /// `message.content`.
    pub fn extract_text(self, value: &Value) -> Option<&str> {
        match self {
            Mode::Generate => value.get("response")?.as_str(),
            Mode::Chat => value.get("message")?.get("content")?.as_str(),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Client-supplied sampling overrides; `None` means "use the configured default"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// `/api/generate` request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratePayload {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i64,
    pub num_predict: i64,
    pub stop: Vec<String>,
}

impl GeneratePayload {
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        system: Option<String>,
        sampling: &SamplingParams,
        defaults: &SamplingDefaults,
        stream: bool,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream,
            system: system.filter(|s| !s.is_empty()),
            temperature: sampling.temperature.unwrap_or(defaults.temperature),
            top_p: sampling.top_p.unwrap_or(defaults.top_p),
            top_k: sampling.top_k.unwrap_or(defaults.top_k),
            num_predict: sampling.num_predict.unwrap_or(defaults.num_predict),
            stop: sampling.stop.clone().unwrap_or_else(|| defaults.stop.clone()),
        }
    }
}

/// Nested `options` object of a chat payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i64,
    pub num_ctx: i64,
    pub num_predict: i64,
    pub stop: Vec<String>,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub repeat_penalty: f64,
    pub tfs_z: f64,
    pub mirostat: i64,
    pub mirostat_tau: f64,
    pub mirostat_eta: f64,
}

/// `/api/chat` request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

impl ChatPayload {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<ChatMessage>,
        sampling: &SamplingParams,
        defaults: &SamplingDefaults,
        stream: bool,
    ) -> Self {
        let options = ChatOptions {
            temperature: sampling.temperature.unwrap_or(defaults.temperature),
            top_p: sampling.top_p.unwrap_or(defaults.top_p),
            top_k: sampling.top_k.unwrap_or(defaults.top_k),
            num_ctx: sampling.num_ctx.unwrap_or(defaults.num_ctx),
            num_predict: sampling.num_predict.unwrap_or(defaults.num_predict),
            stop: sampling.stop.clone().unwrap_or_else(|| defaults.stop.clone()),
            presence_penalty: sampling
                .presence_penalty
                .unwrap_or(defaults.presence_penalty),
            frequency_penalty: sampling
                .frequency_penalty
                .unwrap_or(defaults.frequency_penalty),
            repeat_penalty: defaults.repeat_penalty,
            tfs_z: defaults.tfs_z,
            mirostat: defaults.mirostat,
            mirostat_tau: defaults.mirostat_tau,
            mirostat_eta: defaults.mirostat_eta,
        };

        Self {
            model: model.into(),
            messages,
            stream,
            options,
        }
    }
}

/// A backend request of either shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BackendPayload {
    Generate(GeneratePayload),
    Chat(ChatPayload),
}

impl BackendPayload {
    pub fn mode(&self) -> Mode {
        match self {
            BackendPayload::Generate(_) => Mode::Generate,
            BackendPayload::Chat(_) => Mode::Chat,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            BackendPayload::Generate(p) => &p.model,
            BackendPayload::Chat(p) => &p.model,
        }
    }
}

/// Timing and token counters reported by the backend
///
/// Durations are nanoseconds, as the backend reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub total_duration: u64,
    pub load_duration: u64,
    pub prompt_eval_count: u64,
    pub eval_count: u64,
}

impl Usage {
    /// Read counters from a backend object, treating absent fields as zero
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_u64).unwrap_or(0);
        Self {
            total_duration: field("total_duration"),
            load_duration: field("load_duration"),
            prompt_eval_count: field("prompt_eval_count"),
            eval_count: field("eval_count"),
        }
    }
}

/// Normalized outcome of a buffered backend call
///
/// Failures are data here: `success` is false and `error` carries the
/// message. Callers must check the flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: String,
    #[serde(flatten)]
    pub usage: Option<Usage>,
    /// Raw backend body, kept for verbatim chat pass-through
    #[serde(skip)]
    pub body: Option<Value>,
    /// Typed failure behind `error`
    #[serde(skip)]
    pub failure: Option<BackendError>,
}

impl GatewayResult {
    /// Build a successful result from a backend body
    pub fn completed(mode: Mode, model: impl Into<String>, body: Value) -> Self {
        let response = mode.extract_text(&body).unwrap_or_default().to_string();
        Self {
            success: true,
            response: Some(response),
            error: None,
            model: model.into(),
            usage: Some(Usage::from_value(&body)),
            body: Some(body),
            failure: None,
        }
    }

    pub fn failed(model: impl Into<String>, error: BackendError) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.to_string()),
            model: model.into(),
            usage: None,
            body: None,
            failure: Some(error),
        }
    }
}

/// Backend list-models response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Advisory backend health, never an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
    pub models: Vec<Value>,
}
