//! End-to-end tests for the HTTP gateway
//!
//! Each test runs the real router against a wiremock backend and checks
//! status codes, bodies and how many backend calls were made.

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use ollamahub::gateway::API_KEY_HEADER;
use ollamahub::testing::{TEST_API_KEY, ndjson, test_config, test_router};

// =============================================================================
// Test Fixtures
// =============================================================================

struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl TestResponse {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }

    fn text(&self) -> String {
        String::from_utf8(self.body.to_vec()).expect("response body should be UTF-8")
    }
}

async fn send(
    app: Router,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header(API_KEY_HEADER, key);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    TestResponse {
        status,
        headers,
        body,
    }
}

fn app_for(server: &MockServer) -> Router {
    test_router(test_config(&server.uri()))
}

fn chat_body(model: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream
    })
}

// =============================================================================
// Authentication Tests
// =============================================================================

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_rejected_without_backend_call() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/chat",
            None,
            Some(chat_body("m1", false)),
        )
        .await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.json(), json!({"detail": "invalid api key"}));
    }

    #[tokio::test]
    async fn test_wrong_key_rejected_on_every_endpoint() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        for (method, uri) in [
            ("GET", "/health"),
            ("GET", "/models"),
            ("POST", "/chat"),
            ("POST", "/generate"),
            ("POST", "/embeddings"),
        ] {
            let response = send(app_for(&server), method, uri, Some("wrong"), Some(json!({}))).await;
            assert_eq!(response.status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(response.json()["detail"], "invalid api key");
        }
    }
}

// =============================================================================
// Validation Tests
// =============================================================================

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_ghost_model_lists_allow_list() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/chat",
            Some(TEST_API_KEY),
            Some(chat_body("ghost-model", false)),
        )
        .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let body = response.json();
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("ghost-model"));
        assert!(detail.contains("m1, m2"));
        assert_eq!(body["available_models"], json!(["m1", "m2"]));
    }

    #[tokio::test]
    async fn test_out_of_range_parameter_rejected() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({"message": {"prompt": "hi"}, "temperature": 1.5})),
        )
        .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.json()["detail"].as_str().unwrap().contains("temperature"));
    }

    #[tokio::test]
    async fn test_missing_required_field_is_422() {
        let server = MockServer::start().await;

        let response = send(
            app_for(&server),
            "POST",
            "/chat",
            Some(TEST_API_KEY),
            Some(json!({"model": "m1"})),
        )
        .await;

        assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.json()["detail"].is_string());
    }
}

// =============================================================================
// Buffered Dispatch Tests
// =============================================================================

mod buffered_tests {
    use super::*;

    #[tokio::test]
    async fn test_chat_returns_backend_body_verbatim() {
        let server = MockServer::start().await;
        let backend_body = json!({
            "model": "m1",
            "message": {"role": "assistant", "content": "hello"},
            "done": true
        });
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat"))
            .and(matchers::body_partial_json(json!({
                "model": "m1",
                "stream": false,
                "messages": [{"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(backend_body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/chat",
            Some(TEST_API_KEY),
            Some(chat_body("m1", false)),
        )
        .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json(), backend_body);
    }

    #[tokio::test]
    async fn test_chat_payload_nests_options_with_defaults() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat"))
            .and(matchers::body_partial_json(json!({
                "options": {
                    "temperature": 0.3,
                    "top_p": 0.9,
                    "top_k": 40,
                    "num_ctx": 4096,
                    "repeat_penalty": 1.1
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "ok"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut body = chat_body("m2", false);
        body["temperature"] = json!(0.3);
        let response = send(app_for(&server), "POST", "/chat", Some(TEST_API_KEY), Some(body)).await;

        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_generate_returns_normalized_result() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .and(matchers::body_partial_json(json!({
                "model": "m1",
                "prompt": "Translate: hello",
                "system": "You translate to French",
                "stream": false,
                "temperature": 0.7
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "m1",
                "response": "Bonjour",
                "done": true,
                "total_duration": 5000,
                "load_duration": 100,
                "prompt_eval_count": 4,
                "eval_count": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({
                "message": {"prompt": "Translate: hello", "system": "You translate to French"}
            })),
        )
        .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.json(),
            json!({
                "success": true,
                "response": "Bonjour",
                "model": "m1",
                "total_duration": 5000,
                "load_duration": 100,
                "prompt_eval_count": 4,
                "eval_count": 2
            })
        );
    }

    #[tokio::test]
    async fn test_backend_failure_is_500_with_detail() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({"message": {"prompt": "hi"}})),
        )
        .await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json()["detail"].as_str().unwrap().contains("model exploded"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_500() {
        let app = test_router(test_config("http://127.0.0.1:9"));

        let response = send(
            app,
            "POST",
            "/chat",
            Some(TEST_API_KEY),
            Some(chat_body("m1", false)),
        )
        .await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json()["detail"].is_string());
    }
}

// =============================================================================
// Streaming Tests
// =============================================================================

mod streaming_tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_stream_relays_objects_in_order() {
        let server = MockServer::start().await;
        let chunks = vec![
            json!({"model": "m1", "response": "<think>", "done": false}),
            json!({"model": "m1", "response": "", "done": false}),
            json!({"model": "m1", "response": "</think>", "done": false}),
            json!({"model": "m1", "response": "Bon", "done": false}),
            json!({"model": "m1", "response": "jour", "done": false}),
            json!({"model": "m1", "response": "", "done": true, "eval_count": 5}),
        ];
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .and(matchers::body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&chunks)))
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({"message": {"prompt": "hi"}, "stream": true})),
        )
        .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], "text/event-stream");

        let received: Vec<Value> = response
            .text()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(received, chunks);
    }

    #[tokio::test]
    async fn test_adjacent_objects_are_split() {
        let server = MockServer::start().await;
        let wire = r#"{"response":"a"}{"response":"b"}{"response":"c","done":true}"#;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(wire))
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({"message": {"prompt": "hi"}, "stream": true})),
        )
        .await;

        assert_eq!(
            response.text(),
            "{\"response\":\"a\"}\n{\"response\":\"b\"}\n{\"response\":\"c\",\"done\":true}\n"
        );
    }

    #[tokio::test]
    async fn test_chat_stream_text_format() {
        let server = MockServer::start().await;
        let chunks: Vec<Value> = ["<think>", "", "</think>", "Hel", "lo", ""]
            .iter()
            .enumerate()
            .map(|(i, content)| {
                json!({
                    "message": {"role": "assistant", "content": content},
                    "done": i == 5
                })
            })
            .collect();
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat"))
            .and(matchers::body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_string(ndjson(&chunks)))
            .expect(1)
            .mount(&server)
            .await;

        let mut body = chat_body("m1", true);
        body["stream_format"] = json!("text");
        let response = send(app_for(&server), "POST", "/chat", Some(TEST_API_KEY), Some(body)).await;

        assert_eq!(response.status, StatusCode::OK);
        assert!(
            response.headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        assert_eq!(response.text(), "<think></think>Hello");
    }

    #[tokio::test]
    async fn test_truncated_stream_drops_partial_tail() {
        let server = MockServer::start().await;
        let wire = "{\"response\":\"one\"}\n{\"response\":\"two\"}\n{\"response\":\"thr";
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(wire))
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/generate",
            Some(TEST_API_KEY),
            Some(json!({"message": {"prompt": "hi"}, "stream": true, "stream_format": "text"})),
        )
        .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "onetwo");
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_structured_500() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"error":"model 'm1' not found"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/chat",
            Some(TEST_API_KEY),
            Some(chat_body("m1", true)),
        )
        .await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json()["detail"].as_str().unwrap().contains("not found"));
    }
}

// =============================================================================
// Models, Health and Embeddings Tests
// =============================================================================

mod info_endpoint_tests {
    use super::*;

    async fn mount_tags(server: &MockServer) {
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "m1", "size": 1}, {"name": "other:7b", "size": 2}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_models_is_idempotent() {
        let server = MockServer::start().await;
        mount_tags(&server).await;

        let first = send(app_for(&server), "GET", "/models", Some(TEST_API_KEY), None).await;
        let second = send(app_for(&server), "GET", "/models", Some(TEST_API_KEY), None).await;

        assert_eq!(first.status, StatusCode::OK);
        let (first, second) = (first.json(), second.json());
        assert_eq!(first["default_model"], "m1");
        assert_eq!(first["available_models"], json!(["m1", "m2"]));
        assert_eq!(first["models"].as_array().unwrap().len(), 2);
        assert_eq!(first["available_models"], second["available_models"]);
        assert_eq!(first["default_model"], second["default_model"]);
    }

    #[tokio::test]
    async fn test_models_backend_down_is_500() {
        let app = test_router(test_config("http://127.0.0.1:9"));

        let response = send(app, "GET", "/models", Some(TEST_API_KEY), None).await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.json()["detail"].is_string());
    }

    #[tokio::test]
    async fn test_health_healthy_backend() {
        let server = MockServer::start().await;
        mount_tags(&server).await;

        let response = send(app_for(&server), "GET", "/health", Some(TEST_API_KEY), None).await;

        assert_eq!(response.status, StatusCode::OK);
        let body = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend_status"]["status"], "healthy");
        assert_eq!(body["backend_status"]["models"].as_array().unwrap().len(), 2);
        assert_eq!(body["default_model"], "m1");
    }

    #[tokio::test]
    async fn test_health_unhealthy_backend_is_still_200() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/api/tags"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = send(app_for(&server), "GET", "/health", Some(TEST_API_KEY), None).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json()["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_embeddings_pass_through() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/embeddings"))
            .and(matchers::body_json(json!({"model": "m2", "prompt": "vector me"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embedding": [0.1, 0.2, 0.3]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/embeddings",
            Some(TEST_API_KEY),
            Some(json!({"model": "m2", "prompt": "vector me"})),
        )
        .await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json(), json!({"embedding": [0.1, 0.2, 0.3]}));
    }

    #[tokio::test]
    async fn test_embeddings_ghost_model_rejected() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let response = send(
            app_for(&server),
            "POST",
            "/embeddings",
            Some(TEST_API_KEY),
            Some(json!({"model": "ghost-model", "prompt": "x"})),
        )
        .await;

        assert_eq!(response.status, StatusCode::BAD_REQUEST);
    }
}
