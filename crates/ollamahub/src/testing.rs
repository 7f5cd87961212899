//! Test utilities shared by unit and integration tests

use axum::Router;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::gateway::{AppState, create_router};

/// Key accepted by [`test_config`]
pub const TEST_API_KEY: &str = "test-key";

/// Allow-list used by [`test_config`]
pub const TEST_MODELS: [&str; 2] = ["m1", "m2"];

/// Configuration pointing at `backend_url` with one key and a two-model allow-list
pub fn test_config(backend_url: &str) -> Config {
    let mut config = Config::default();
    config.backend.url = backend_url.to_string();
    config.backend.connect_timeout_secs = 2;
    config.backend.request_timeout_secs = 10;
    config.models.default_model = TEST_MODELS[0].to_string();
    config.models.available_models = TEST_MODELS.iter().map(|m| m.to_string()).collect();
    config
        .auth
        .api_keys
        .insert("default".to_string(), TEST_API_KEY.to_string());
    config
}

/// Router wired to `config`
///
/// Panics if the configuration cannot build a backend client.
pub fn test_router(config: Config) -> Router {
    let state = AppState::new(config).expect("test config should build a backend client");
    create_router(Arc::new(state))
}

/// Concatenate objects as newline-delimited JSON, the way the backend streams
pub fn ndjson(objects: &[Value]) -> String {
    objects.iter().map(|o| format!("{o}\n")).collect()
}
