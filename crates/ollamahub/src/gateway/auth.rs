//! `X-API-Key` authentication middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::AppState;
use super::error::GatewayError;

/// Header carrying the client's key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-Key` is missing or not configured
///
/// Runs before any handler, so a rejected request never reaches the backend.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let Some(presented) = presented else {
        warn!(path = %request.uri().path(), "Request without API key");
        return Err(GatewayError::Unauthorized);
    };

    match state.config.auth.key_name(presented) {
        Some(name) => {
            debug!(key = name, "API key accepted");
            Ok(next.run(request).await)
        }
        None => {
            warn!(path = %request.uri().path(), "Request with unknown API key");
            Err(GatewayError::Unauthorized)
        }
    }
}
