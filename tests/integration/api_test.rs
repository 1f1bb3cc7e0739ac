use crate::{memory_state, ADMIN_USER_ID};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use resume_ledger::{routes::create_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{header as header_matcher, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn bearer(state: &AppState, user_id: &str, role: Option<&str>) -> String {
    let token = state
        .jwt_service
        .generate_token(user_id, role, time::Duration::minutes(15))
        .unwrap();
    format!("Bearer {}", token)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, axum::http::HeaderMap) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, json, headers)
}

async fn mock_provider(status: u16, body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_matcher("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn completion(content: &str) -> Value {
    json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

fn generate_body() -> Value {
    json!({
        "feature": "improve_bullet",
        "prompt": "Responsible for managing the team's deployment pipeline"
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let state = memory_state("http://127.0.0.1:9");
    let app = create_router(state);

    let (status, body, headers) = send(&app, Method::GET, "/api/v1/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "ok");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_credits_require_token() {
    let state = memory_state("http://127.0.0.1:9");
    let app = create_router(state);

    let (status, body, _) = send(&app, Method::GET, "/api/v1/credits", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, body, _) = send(
        &app,
        Method::GET,
        "/api/v1/credits",
        Some("Bearer not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_first_balance_read_provisions_default_grant() {
    let state = memory_state("http://127.0.0.1:9");
    let auth = bearer(&state, "user_api", None);
    let app = create_router(state);

    let (status, body, _) = send(&app, Method::GET, "/api/v1/credits", Some(&auth), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["userId"], "user_api");
    assert_eq!(body["data"]["credits"], 200);
    assert_eq!(body["data"]["subscriptionTier"], "free");
    assert_eq!(body["data"]["subscriptionStatus"], "active");
}

#[tokio::test]
async fn test_generate_charges_after_success() {
    let provider = mock_provider(200, completion("Led a 4-person team that cut deploy time 60%")).await;
    let state = memory_state(&provider.uri());
    let auth = bearer(&state, "user_gen", None);
    let app = create_router(state.clone());

    let (status, body, headers) = send(
        &app,
        Method::POST,
        "/api/v1/ai/generate",
        Some(&auth),
        Some(generate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["content"],
        "Led a 4-person team that cut deploy time 60%"
    );
    assert_eq!(headers["x-credits-remaining"], "195");

    let (_, history, _) = send(
        &app,
        Method::GET,
        "/api/v1/credits/transactions?type=deduction",
        Some(&auth),
        None,
    )
    .await;
    assert_eq!(history["data"]["total"], 1);
    let entry = &history["data"]["transactions"][0];
    assert_eq!(entry["type"], "deduction");
    assert_eq!(entry["amount"], 5);
    assert_eq!(entry["balanceAfter"], 195);
    assert_eq!(entry["metadata"]["endpoint"], "/api/v1/ai/generate");
    assert!(entry["metadata"]["requestId"].as_str().is_some_and(|id| !id.is_empty()));

    let admin_auth = bearer(&state, ADMIN_USER_ID, None);
    let (status, pattern, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/users/user_gen/usage-pattern",
        Some(&admin_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pattern["data"]["mostUsedEndpoint"], "/api/v1/ai/generate");
}

#[tokio::test]
async fn test_provider_failure_is_not_charged() {
    let provider = mock_provider(400, json!({ "error": "bad request" })).await;
    let state = memory_state(&provider.uri());
    let auth = bearer(&state, "user_unlucky", None);
    let app = create_router(state.clone());

    let (status, body, _) = send(
        &app,
        Method::POST,
        "/api/v1/ai/generate",
        Some(&auth),
        Some(generate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "AI_PROVIDER_ERROR");
    assert_eq!(
        state
            .credit_service
            .get_user_credits("user_unlucky")
            .await
            .unwrap(),
        200
    );
}

#[tokio::test]
async fn test_insufficient_credits_returns_402() {
    let provider = mock_provider(200, completion("unused")).await;
    let state = memory_state(&provider.uri());
    state.credit_service.get_user_credits("user_broke").await.unwrap();
    state
        .credit_service
        .adjust_user_credits("user_broke", -197, "drain", ADMIN_USER_ID)
        .await
        .unwrap();
    let auth = bearer(&state, "user_broke", None);
    let app = create_router(state.clone());

    let (status, body, _) = send(
        &app,
        Method::POST,
        "/api/v1/ai/generate",
        Some(&auth),
        Some(generate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
    assert_eq!(body["error"]["details"]["currentBalance"], 3);
    assert_eq!(body["error"]["details"]["requiredCredits"], 5);

    // The provider was never called
    assert!(provider.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_routes_need_admin() {
    let state = memory_state("http://127.0.0.1:9");
    let user_auth = bearer(&state, "user_plain", None);
    let app = create_router(state);

    let (status, body, _) = send(&app, Method::GET, "/api/v1/admin/stats", Some(&user_auth), None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_admin_adjust_and_consistency() {
    let state = memory_state("http://127.0.0.1:9");
    state.credit_service.get_user_credits("user_target").await.unwrap();
    let admin_auth = bearer(&state, ADMIN_USER_ID, None);
    let app = create_router(state);

    let (status, body, _) = send(
        &app,
        Method::POST,
        "/api/v1/admin/credits/adjust",
        Some(&admin_auth),
        Some(json!({ "userId": "user_target", "delta": -500, "reason": "fraud chargeback" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["newBalance"], 0);
    assert_eq!(body["data"]["appliedDelta"], -200);

    let (status, body, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/users/user_target/consistency",
        Some(&admin_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isConsistent"], true);
    assert_eq!(body["data"]["userBalance"], 0);
}

#[tokio::test]
async fn test_admin_adjust_validation_and_unknown_user() {
    let state = memory_state("http://127.0.0.1:9");
    let admin_auth = bearer(&state, "any_admin", Some("admin"));
    let app = create_router(state);

    let (status, _, _) = send(
        &app,
        Method::POST,
        "/api/v1/admin/credits/adjust",
        Some(&admin_auth),
        Some(json!({ "userId": "someone", "delta": 20000, "reason": "too big" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body, _) = send(
        &app,
        Method::POST,
        "/api/v1/admin/credits/adjust",
        Some(&admin_auth),
        Some(json!({ "userId": "nobody", "delta": 10, "reason": "goodwill" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_admin_subscription_and_reports() {
    let state = memory_state("http://127.0.0.1:9");
    state.credit_service.get_user_credits("user_sub").await.unwrap();
    let admin_auth = bearer(&state, ADMIN_USER_ID, None);
    let app = create_router(state);

    let (status, body, _) = send(
        &app,
        Method::PUT,
        "/api/v1/admin/users/user_sub/subscription",
        Some(&admin_auth),
        Some(json!({ "tier": "premium", "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscriptionTier"], "premium");

    let (status, body, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/conversions",
        Some(&admin_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["paidUsers"], 1);

    let (status, body, _) = send(&app, Method::GET, "/api/v1/admin/alerts", Some(&admin_auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body, _) = send(
        &app,
        Method::GET,
        "/api/v1/admin/users/user_sub/transactions?limit=5",
        Some(&admin_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["limit"], 5);
    assert_eq!(body["data"]["total"], 1);
}
