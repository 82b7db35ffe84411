//! Gemini client behavior against a mock HTTP server.
//!
//! Run with:
//!   cargo test --test gemini_client

use gemrelay::config::GenerationConfig;
use gemrelay::conversation::Turn;
use gemrelay::providers::{GeminiProvider, GenerationError, Provider};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

fn generation() -> GenerationConfig {
    GenerationConfig {
        request_timeout: Duration::from_secs(5),
        ..GenerationConfig::default()
    }
}

fn provider_for(server: &MockServer, generation: GenerationConfig) -> GeminiProvider {
    GeminiProvider::new("test-key", generation).with_api_base(&format!("{}/v1beta", server.uri()))
}

fn reply_body(parts: &[&str]) -> serde_json::Value {
    let parts: Vec<_> = parts.iter().map(|text| json!({ "text": text })).collect();
    json!({ "candidates": [{ "content": { "role": "model", "parts": parts } }] })
}

#[tokio::test]
async fn successful_call_returns_extracted_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body(&["Hello, ", "world"])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    let reply = provider.generate(&[Turn::user("Hi")]).await;

    assert_eq!(reply, Ok("Hello, world".to_string()));
}

#[tokio::test]
async fn request_carries_key_header_history_and_sampling_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "Hi" }] },
                { "role": "model", "parts": [{ "text": "Hello!" }] },
                { "role": "user", "parts": [{ "text": "Tell me a joke" }] }
            ],
            "systemInstruction": { "parts": [{ "text": "Be funny." }] },
            "generationConfig": { "temperature": 0.7 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body(&["Knock knock."])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(
        &server,
        GenerationConfig {
            system_instruction: Some("Be funny.".into()),
            ..generation()
        },
    );
    let turns = [
        Turn::user("Hi"),
        Turn::model("Hello!"),
        Turn::user("Tell me a joke"),
    ];

    assert_eq!(provider.generate(&turns).await, Ok("Knock knock.".into()));
}

#[tokio::test]
async fn custom_key_header_is_used() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body(&["ok"])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation()).with_api_key_header("x-api-key");
    assert_eq!(provider.generate(&[Turn::user("Hi")]).await, Ok("ok".into()));
}

#[tokio::test]
async fn empty_candidates_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    assert_eq!(
        provider.generate(&[Turn::user("Hi")]).await,
        Err(GenerationError::EmptyResponse)
    );
}

#[tokio::test]
async fn whitespace_only_reply_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body(&["  ", "\n"])))
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    assert_eq!(
        provider.generate(&[Turn::user("Hi")]).await,
        Err(GenerationError::EmptyResponse)
    );
}

#[tokio::test]
async fn http_error_status_is_classified_as_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    assert_eq!(
        provider.generate(&[Turn::user("Hi")]).await,
        Err(GenerationError::Api { status: 403 })
    );
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    assert_eq!(
        provider.generate(&[Turn::user("Hi")]).await,
        Err(GenerationError::Api { status: 503 })
    );
}

#[tokio::test]
async fn slow_response_is_classified_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(reply_body(&["too late"]))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let provider = provider_for(
        &server,
        GenerationConfig {
            request_timeout: Duration::from_millis(100),
            ..generation()
        },
    );
    assert_eq!(
        provider.generate(&[Turn::user("Hi")]).await,
        Err(GenerationError::Timeout)
    );
}

#[tokio::test]
async fn non_json_body_is_classified_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MODEL_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    let result = provider.generate(&[Turn::user("Hi")]).await;
    assert!(
        matches!(result, Err(GenerationError::Unknown(_))),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn unreachable_host_is_classified_as_unknown() {
    // Nothing listens on the discard port.
    let provider = GeminiProvider::new("test-key", generation())
        .with_api_base("http://127.0.0.1:9/v1beta");
    let result = provider.generate(&[Turn::user("Hi")]).await;
    assert!(
        matches!(result, Err(GenerationError::Unknown(_))),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn warmup_checks_model_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/models/gemini-2.5-flash"))
        .and(header("x-goog-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "models/gemini-2.5-flash"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    assert!(provider.warmup().await.is_ok());
}

#[tokio::test]
async fn warmup_reports_rejected_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/models/gemini-2.5-flash"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let provider = provider_for(&server, generation());
    let err = provider.warmup().await.unwrap_err();
    assert!(err.to_string().contains("401"));
}
