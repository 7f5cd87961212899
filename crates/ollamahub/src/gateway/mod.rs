//! Authenticated HTTP gateway
//!
//! Exposes `/health`, `/models`, `/chat`, `/generate` and `/embeddings`
//! behind `X-API-Key` authentication, plus the optional demo page.

mod auth;
mod error;
mod handlers;
mod request;

pub use auth::{API_KEY_HEADER, require_api_key};
pub use error::GatewayError;
pub use request::{
    ChatRequest, EmbeddingsRequest, GenerateMessage, GenerateRequest, GenerationRequest, Input,
    RequestGateway,
};

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{HubError, Result};

/// Shared, read-only state for all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Config,
    pub gateway: RequestGateway,
}

impl AppState {
    /// Build the backend client and gateway from configuration
    pub fn new(config: Config) -> Result<Self> {
        let backend = BackendClient::new(&config.backend, config.sampling.clone())?;
        let gateway = RequestGateway::new(backend, config.models.clone(), config.stream.clone());
        Ok(Self { config, gateway })
    }
}

/// The gateway HTTP server
pub struct GatewayServer {
    config: Config,
}

impl GatewayServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Bind the listener and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let state = Arc::new(AppState::new(self.config.clone())?);
        let app = create_router(state);

        let addr: SocketAddr = self
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| HubError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting {} on {addr}", self.config.server.project_name);
        tracing::info!("Backend: {}", self.config.backend.url);
        tracing::info!(
            "Models: default {} ({} allowed)",
            self.config.models.default_model,
            self.config.models.available_models.len()
        );
        match &self.config.server.static_dir {
            Some(dir) => tracing::info!("Serving demo page from {}", dir.display()),
            None => tracing::info!("Demo page disabled (no server.static_dir)"),
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HubError::Server(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| HubError::Server(format!("Server error: {e}")))?;

        tracing::info!("Gateway shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
///
/// API routes sit behind the key check; the demo page and static assets
/// do not.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::models))
        .route("/chat", post(handlers::chat))
        .route("/generate", post(handlers::generate))
        .route("/embeddings", post(handlers::embeddings))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    if let Some(dir) = &state.config.server.static_dir {
        router = router
            .route_service("/", ServeFile::new(dir.join("index.html")))
            .nest_service("/static", ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
