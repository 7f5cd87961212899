//! Inference backend client
//!
//! Talks to an Ollama-compatible HTTP service: model listing, health,
//! buffered and streaming generate/chat, embeddings.

mod client;
mod error;
mod types;

pub use client::{BackendClient, ByteStream};
pub use error::BackendError;
pub use types::{
    BackendPayload, ChatMessage, ChatOptions, ChatPayload, GatewayResult, GeneratePayload,
    HealthReport, HealthStatus, Mode, ModelList, SamplingParams, Usage,
};
