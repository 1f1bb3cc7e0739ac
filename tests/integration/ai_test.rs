use crate::test_config;
use resume_ledger::{models::ai::CoachFeature, services::AIService, ApiError};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn service(server: &MockServer, attempts: u8) -> AIService {
    let mut config = test_config(&server.uri());
    config.ai.openrouter.retry.attempts = attempts;
    config.ai.openrouter.retry.backoff_ms = 1;
    AIService::new(&config.ai).unwrap()
}

fn completion(content: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Tailored summary")))
        .with_priority(2)
        .mount(&server)
        .await;

    let data = service(&server, 2)
        .generate_text(CoachFeature::Summary, "Backend engineer, 6 years", None)
        .await
        .unwrap();

    assert_eq!(data.content, "Tailored summary");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = service(&server, 3)
        .generate_text(CoachFeature::CoverLetter, "Write one", Some("Rust engineer"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::AIProvider(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retries_stop_after_configured_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = service(&server, 2)
        .generate_text(CoachFeature::ImproveBullet, "Did stuff", None)
        .await
        .unwrap_err();

    match err {
        ApiError::AIProvider(message) => assert!(message.contains("429"), "{}", message),
        other => panic!("Expected AIProvider, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
