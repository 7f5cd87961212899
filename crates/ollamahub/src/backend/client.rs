//! HTTP client for the Ollama-compatible inference backend

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::error::BackendError;
use super::types::{
    BackendPayload, ChatMessage, ChatPayload, GatewayResult, GeneratePayload, HealthReport,
    HealthStatus, ModelList, SamplingParams,
};
use crate::config::{BackendConfig, SamplingDefaults};
use crate::error::{HubError, Result};

/// Raw streaming body of a backend response
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, BackendError>>;

/// Client for one backend base URL
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
    defaults: SamplingDefaults,
}

impl BackendClient {
    /// Build a client from configuration
    ///
    /// The shared client only carries a connect timeout. Buffered calls get
    /// the total request timeout; streams get the idle timeout between body
    /// reads instead, since a stream's length is decided by the model.
    pub fn new(config: &BackendConfig, defaults: SamplingDefaults) -> Result<Self> {
        let mut base_url = Url::parse(&config.url)
            .map_err(|e| HubError::Config(format!("Invalid backend URL '{}': {e}", config.url)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| HubError::Backend(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
            defaults,
        })
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Unreachable(format!("Invalid backend path '{path}': {e}")))
    }

    /// Build a generate payload with configured defaults filled in
    pub fn generate_payload(
        &self,
        model: &str,
        prompt: &str,
        system: Option<String>,
        sampling: &SamplingParams,
        stream: bool,
    ) -> BackendPayload {
        BackendPayload::Generate(GeneratePayload::new(
            model,
            prompt,
            system,
            sampling,
            &self.defaults,
            stream,
        ))
    }

    /// Build a chat payload with configured defaults filled in
    pub fn chat_payload(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        sampling: &SamplingParams,
        stream: bool,
    ) -> BackendPayload {
        BackendPayload::Chat(ChatPayload::new(
            model,
            messages,
            sampling,
            &self.defaults,
            stream,
        ))
    }

    async fn read_json(response: reqwest::Response) -> std::result::Result<Value, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Malformed(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> std::result::Result<Value, BackendError> {
        let url = self.endpoint(path)?;
        debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        Self::read_json(response).await
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> std::result::Result<Value, BackendError> {
        let url = self.endpoint(path)?;
        debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::from_transport(&e))?;

        Self::read_json(response).await
    }

    /// List models installed on the backend (`GET /api/tags`)
    pub async fn list_models(&self) -> std::result::Result<ModelList, BackendError> {
        let body = self.get_json("api/tags").await?;
        serde_json::from_value(body).map_err(|e| BackendError::Malformed(e.to_string()))
    }

    /// Probe backend availability by listing its models
    ///
    /// Never fails: an unreachable backend is reported as unhealthy.
    pub async fn health_probe(&self) -> HealthReport {
        match self.list_models().await {
            Ok(list) => HealthReport {
                status: HealthStatus::Healthy,
                detail: "Backend is running".to_string(),
                models: list.models,
            },
            Err(e) => {
                warn!("Backend health probe failed: {e}");
                HealthReport {
                    status: HealthStatus::Unhealthy,
                    detail: e.to_string(),
                    models: Vec::new(),
                }
            }
        }
    }

    /// Run a payload to completion and normalize the outcome
    ///
    /// The payload's own `stream` flag is ignored; the backend is always
    /// asked for a single buffered body.
    pub async fn dispatch(&self, payload: &BackendPayload) -> GatewayResult {
        let mode = payload.mode();
        let model = payload.model().to_string();

        let outcome = match payload {
            BackendPayload::Generate(p) if p.stream => {
                let mut p = p.clone();
                p.stream = false;
                self.post_json(mode.endpoint(), &p).await
            }
            BackendPayload::Chat(p) if p.stream => {
                let mut p = p.clone();
                p.stream = false;
                self.post_json(mode.endpoint(), &p).await
            }
            other => self.post_json(mode.endpoint(), other).await,
        };

        match outcome {
            Ok(body) => GatewayResult::completed(mode, model, body),
            Err(e) => {
                warn!(mode = %mode, model = %model, "Buffered backend call failed: {e}");
                GatewayResult::failed(model, e)
            }
        }
    }

    /// One-shot text generation
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: Option<String>,
        sampling: &SamplingParams,
    ) -> GatewayResult {
        let payload = self.generate_payload(model, prompt, system, sampling, false);
        self.dispatch(&payload).await
    }

    /// One-shot chat completion
    pub async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        sampling: &SamplingParams,
    ) -> GatewayResult {
        let payload = self.chat_payload(model, messages, sampling, false);
        self.dispatch(&payload).await
    }

    /// Start a streaming call and return the raw body stream
    ///
    /// A non-success status is returned as an error before any byte is
    /// handed out, so callers can still answer with a structured error.
    /// Waiting for the response headers is bounded by the request timeout
    /// (the backend may load the model first); after that each body read is
    /// bounded by the idle timeout, and a stalled read ends the stream with
    /// [`BackendError::Stream`].
    pub async fn open_stream(
        &self,
        payload: &BackendPayload,
    ) -> std::result::Result<ByteStream, BackendError> {
        let url = self.endpoint(payload.mode().endpoint())?;
        debug!("POST {url} (streaming)");

        let send = self.client.post(url).json(payload).send();
        let response = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| {
                BackendError::Unreachable(format!(
                    "No response from backend within {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| BackendError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let idle = self.stream_idle_timeout;
        let reads = tokio_stream::StreamExt::timeout(response.bytes_stream(), idle);
        Ok(reads
            .map(move |read| match read {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(e)) => Err(BackendError::Stream(e.to_string())),
                Err(_) => Err(BackendError::Stream(format!(
                    "No data from backend for {}s",
                    idle.as_secs()
                ))),
            })
            .boxed())
    }

    /// Compute an embedding vector (`POST /api/embeddings`)
    pub async fn embeddings(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<Value, BackendError> {
        let body = serde_json::json!({
            "model": model,
            "prompt": prompt,
        });
        self.post_json("api/embeddings", &body).await
    }
}
