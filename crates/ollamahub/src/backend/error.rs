//! Errors raised while talking to the inference backend

use thiserror::Error;

/// Failure of a single backend call.
///
/// No retries happen below this type: one failed HTTP exchange produces one
/// error and the caller decides what to do with it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout before a response
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered 2xx but the body was not the expected JSON
    #[error("Malformed backend response: {0}")]
    Malformed(String),

    /// A streaming body failed after the response started
    #[error("Backend stream failed: {0}")]
    Stream(String),
}

impl BackendError {
    /// Classify a transport error from the HTTP client
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Unreachable(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            BackendError::Unreachable(format!("Failed to connect to backend: {e}"))
        } else if e.is_decode() {
            BackendError::Malformed(e.to_string())
        } else {
            BackendError::Unreachable(format!("Request failed: {e}"))
        }
    }

    /// Whether the backend never produced a response
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BackendError::Unreachable(_))
    }
}
