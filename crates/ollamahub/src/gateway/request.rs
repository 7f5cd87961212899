//! Request validation and dispatch
//!
//! Chat and generate requests are normalized into one [`GenerationRequest`]
//! and go through the same path:
//! `Received -> Validated -> Dispatched -> Completed | Failed` when buffered,
//! `Received -> Validated -> Dispatched -> Relaying -> Closed` when streaming.
//! Each request gets its own span with a fresh id.

use axum::{
    Json,
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::error::GatewayError;
use crate::backend::{BackendClient, BackendPayload, ChatMessage, Mode, SamplingParams};
use crate::config::{ModelsConfig, StreamConfig};
use crate::stream::{StreamFormat, StreamRelay};

/// `POST /chat` body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_format: StreamFormat,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

/// Prompt half of a generate request
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateMessage {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
}

/// `POST /generate` body
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub message: GenerateMessage,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_format: StreamFormat,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

/// `POST /embeddings` body
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
}

/// Mode-specific input
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Chat(Vec<ChatMessage>),
    Generate {
        prompt: String,
        system: Option<String>,
    },
}

/// A chat or generate request after model resolution
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub input: Input,
    pub sampling: SamplingParams,
    pub stream: bool,
    pub stream_format: StreamFormat,
}

impl GenerationRequest {
    pub fn from_chat(request: ChatRequest, models: &ModelsConfig) -> Self {
        Self {
            model: resolve_model(request.model, models),
            input: Input::Chat(request.messages),
            sampling: request.sampling,
            stream: request.stream,
            stream_format: request.stream_format,
        }
    }

    pub fn from_generate(request: GenerateRequest, models: &ModelsConfig) -> Self {
        Self {
            model: resolve_model(request.model, models),
            input: Input::Generate {
                prompt: request.message.prompt,
                system: request.message.system,
            },
            sampling: request.sampling,
            stream: request.stream,
            stream_format: request.stream_format,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.input {
            Input::Chat(_) => Mode::Chat,
            Input::Generate { .. } => Mode::Generate,
        }
    }

    /// Check model membership, parameter ranges and required input
    pub fn validate(&self, models: &ModelsConfig) -> Result<(), GatewayError> {
        check_model(&self.model, models)?;

        let s = &self.sampling;
        check_unit_range("temperature", s.temperature)?;
        check_unit_range("top_p", s.top_p)?;
        check_unit_range("presence_penalty", s.presence_penalty)?;
        check_unit_range("frequency_penalty", s.frequency_penalty)?;

        if let Some(top_k) = s.top_k.filter(|k| *k < 0) {
            return Err(GatewayError::InvalidParameter(format!(
                "top_k must be >= 0, got {top_k}"
            )));
        }
        if let Some(num_ctx) = s.num_ctx.filter(|n| *n < 1) {
            return Err(GatewayError::InvalidParameter(format!(
                "num_ctx must be >= 1, got {num_ctx}"
            )));
        }

        match &self.input {
            Input::Chat(messages) if messages.is_empty() => Err(GatewayError::InvalidParameter(
                "messages must contain at least one message".to_string(),
            )),
            Input::Generate { prompt, .. } if prompt.is_empty() => Err(
                GatewayError::InvalidParameter("message.prompt must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Build the backend payload, filling omitted fields from configured defaults
    pub fn into_payload(self, backend: &BackendClient) -> BackendPayload {
        match self.input {
            Input::Chat(messages) => {
                backend.chat_payload(&self.model, messages, &self.sampling, self.stream)
            }
            Input::Generate { prompt, system } => {
                backend.generate_payload(&self.model, &prompt, system, &self.sampling, self.stream)
            }
        }
    }
}

/// Omitted or empty model falls back to the configured default
fn resolve_model(requested: Option<String>, models: &ModelsConfig) -> String {
    requested
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| models.default_model.clone())
}

fn check_model(model: &str, models: &ModelsConfig) -> Result<(), GatewayError> {
    if models.is_allowed(model) {
        Ok(())
    } else {
        Err(GatewayError::UnsupportedModel {
            model: model.to_string(),
            available: models.available_models.clone(),
        })
    }
}

fn check_unit_range(name: &str, value: Option<f64>) -> Result<(), GatewayError> {
    match value {
        Some(v) if !v.is_finite() || !(0.0..=1.0).contains(&v) => Err(
            GatewayError::InvalidParameter(format!("{name} must be between 0 and 1, got {v}")),
        ),
        _ => Ok(()),
    }
}

/// Validates requests and dispatches them to the backend
#[derive(Debug, Clone)]
pub struct RequestGateway {
    backend: BackendClient,
    models: ModelsConfig,
    stream: StreamConfig,
}

impl RequestGateway {
    pub fn new(backend: BackendClient, models: ModelsConfig, stream: StreamConfig) -> Self {
        Self {
            backend,
            models,
            stream,
        }
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn models(&self) -> &ModelsConfig {
        &self.models
    }

    /// Validate, dispatch and answer one chat or generate request
    pub async fn dispatch(&self, request: GenerationRequest) -> Result<Response, GatewayError> {
        let span = info_span!(
            "request",
            id = %Uuid::new_v4(),
            mode = %request.mode(),
            model = %request.model,
        );
        self.handle(request).instrument(span).await
    }

    async fn handle(&self, request: GenerationRequest) -> Result<Response, GatewayError> {
        info!(stream = request.stream, "Received");

        if let Err(e) = request.validate(&self.models) {
            info!(reason = e.category(), "Rejected: {e}");
            return Err(e);
        }
        debug!("Validated");

        let stream = request.stream;
        let format = request.stream_format;
        let payload = request.into_payload(&self.backend);

        if stream {
            self.relay(payload, format).await
        } else {
            self.buffered(payload).await
        }
    }

    async fn buffered(&self, payload: BackendPayload) -> Result<Response, GatewayError> {
        debug!("Dispatched (buffered)");
        let result = self.backend.dispatch(&payload).await;

        if !result.success {
            let err = match result.failure {
                Some(failure) => GatewayError::from(failure),
                None => GatewayError::BackendError(result.error.unwrap_or_default()),
            };
            info!(reason = err.category(), "Failed");
            return Err(err);
        }

        info!(
            eval_count = result.usage.map(|u| u.eval_count),
            total_duration = result.usage.map(|u| u.total_duration),
            "Completed"
        );

        match payload.mode() {
            Mode::Chat => Ok(Json(result.body.unwrap_or(Value::Null)).into_response()),
            Mode::Generate => Ok(Json(result).into_response()),
        }
    }

    async fn relay(
        &self,
        payload: BackendPayload,
        format: StreamFormat,
    ) -> Result<Response, GatewayError> {
        debug!("Dispatched (streaming)");
        let backend = match self.backend.open_stream(&payload).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open backend stream: {e}");
                return Err(e.into());
            }
        };

        let handle = StreamRelay::new(payload.mode(), format, &self.stream).spawn(backend);
        info!(format = ?format, "Relaying");

        Ok((
            [
                (header::CONTENT_TYPE, format.content_type()),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(handle.body),
        )
            .into_response())
    }

    /// Compute embeddings for an allow-listed model
    pub async fn embeddings(&self, request: EmbeddingsRequest) -> Result<Value, GatewayError> {
        let model = resolve_model(request.model, &self.models);
        let span = info_span!("request", id = %Uuid::new_v4(), mode = "embeddings", model = %model);

        async {
            info!("Received");
            check_model(&model, &self.models)?;
            if request.prompt.is_empty() {
                return Err(GatewayError::InvalidParameter(
                    "prompt must not be empty".to_string(),
                ));
            }

            let body = self.backend.embeddings(&model, &request.prompt).await?;
            info!("Completed");
            Ok(body)
        }
        .instrument(span)
        .await
    }
}
