//! Error types for OllamaHub

use thiserror::Error;

/// Process-level error type.
///
/// Covers failures that stop the daemon (bad configuration, bind errors).
/// Request-scoped failures use [`crate::backend::BackendError`] and
/// [`crate::gateway::GatewayError`] instead.
#[derive(Error, Debug)]
pub enum HubError {
    /// Configuration errors (unreadable file, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// Backend client construction errors
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for OllamaHub operations
pub type Result<T> = std::result::Result<T, HubError>;
