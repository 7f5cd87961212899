//! Client-visible errors for the HTTP surface
//!
//! Every variant renders as `{"detail": "<message>"}` with its own status.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::backend::BackendError;

/// Errors returned to API clients
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Requested model is not in the allow-list
    #[error("Model '{model}' is not supported. Available models: {}", .available.join(", "))]
    UnsupportedModel {
        model: String,
        available: Vec<String>,
    },

    /// A sampling parameter or required field is out of range
    #[error("{0}")]
    InvalidParameter(String),

    /// Request body could not be decoded
    #[error("{message}")]
    MalformedBody { status: StatusCode, message: String },

    /// Missing or unknown API key
    #[error("invalid api key")]
    Unauthorized,

    /// Backend never answered
    #[error("{0}")]
    BackendUnreachable(String),

    /// Backend answered with a failure
    #[error("{0}")]
    BackendError(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedModel { .. } | GatewayError::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::MalformedBody { status, .. } => *status,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::BackendUnreachable(_) | GatewayError::BackendError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::UnsupportedModel { .. } => "unsupported_model",
            GatewayError::InvalidParameter(_) => "invalid_parameter",
            GatewayError::MalformedBody { .. } => "malformed_body",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::BackendUnreachable(_) => "backend_unreachable",
            GatewayError::BackendError(_) => "backend_error",
        }
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        if err.is_unreachable() {
            GatewayError::BackendUnreachable(err.to_string())
        } else {
            GatewayError::BackendError(err.to_string())
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::MalformedBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(category = self.category(), "{self}");
        }

        let body = match &self {
            GatewayError::UnsupportedModel { available, .. } => json!({
                "detail": self.to_string(),
                "available_models": available,
            }),
            _ => json!({ "detail": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
