//! OllamaHub - authenticated HTTP gateway for an Ollama inference backend
//!
//! Validates chat and generate requests against a model allow-list, builds
//! backend payloads with configured sampling defaults, and relays buffered
//! or streamed results back to clients.

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod stream;
pub mod testing;

pub use error::HubError;
