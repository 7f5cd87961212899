//! API endpoint handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::Response,
};
use serde_json::{Value, json};
use std::sync::Arc;

use super::AppState;
use super::error::GatewayError;
use super::request::{ChatRequest, EmbeddingsRequest, GenerateRequest, GenerationRequest};

/// Service and backend status
///
/// Always 200: a down backend is reported in the body, not as an error.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let report = state.gateway.backend().health_probe().await;
    let models = state.gateway.models();

    Json(json!({
        "status": report.status,
        "backend_status": report,
        "api_version": state.config.server.api_version,
        "default_model": models.default_model,
        "available_models": models.available_models,
    }))
}

/// Installed backend models plus the allow-list
pub async fn models(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let list = state.gateway.backend().list_models().await?;
    let models = state.gateway.models();

    Ok(Json(json!({
        "models": list.models,
        "default_model": models.default_model,
        "available_models": models.available_models,
    })))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload?;
    let request = GenerationRequest::from_chat(request, state.gateway.models());
    state.gateway.dispatch(request).await
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload?;
    let request = GenerationRequest::from_generate(request, state.gateway.models());
    state.gateway.dispatch(request).await
}

pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmbeddingsRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let Json(request) = payload?;
    Ok(Json(state.gateway.embeddings(request).await?))
}
