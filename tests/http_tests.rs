use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gatekeeper::handlers::AppState;
use gatekeeper::policy::{PolicyConfig, ScopePolicy};
use gatekeeper::{create_app, LimiterOptions, MemoryStore, RateLimiter};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app() -> Router {
    let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), LimiterOptions::default());
    let mut policies = PolicyConfig::with_default(ScopePolicy::new(10, Duration::from_secs(60)));
    policies.set_policy("login", ScopePolicy::new(2, Duration::from_secs(90)));
    create_app(AppState::new(limiter, policies))
}

fn check_request(
    scope: &str,
    client_ip: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/v1/check/{}", scope));
    if let Some(ip) = client_ip {
        builder = builder.header("x-forwarded-for", ip);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_check_uses_scope_policy_and_client_ip() {
    let app = app();

    let response = app
        .clone()
        .oneshot(check_request("login", Some("192.0.2.10, 10.0.0.1"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    assert_eq!(response.headers()["x-ratelimit-reset-ms"], "90000");

    let body = json_body(response).await;
    assert_eq!(body["identity"], "192.0.2.10");
    assert_eq!(body["allowed"], true);
    assert_eq!(body["attempts_used"], 1);
}

#[tokio::test]
async fn test_exhausted_budget_returns_429() {
    let app = app();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(check_request("login", Some("192.0.2.11"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(check_request("login", Some("192.0.2.11"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let body = json_body(response).await;
    assert_eq!(body["allowed"], false);
    assert_eq!(body["attempts_remaining"], 0);
    assert_eq!(body["attempts_used"], 2);
}

#[tokio::test]
async fn test_body_overrides_identity_and_limits() {
    let app = app();
    let body = serde_json::json!({ "identity": "user-7", "max_attempts": 4, "window_ms": 1500 });

    let response = app
        .oneshot(check_request("signup", Some("192.0.2.12"), Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["identity"], "user-7");
    assert_eq!(body["limit"], 4);
    assert_eq!(body["attempts_remaining"], 3);
    assert_eq!(body["retry_after_ms"], 1500);
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let response = app().oneshot(check_request("login", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/check/login")
        .header("x-forwarded-for", "192.0.2.14")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"identity": "user-9", "max_attempts": "#))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn test_wrongly_typed_body_is_rejected() {
    let body = serde_json::json!({ "max_attempts": "three" });
    let response = app()
        .oneshot(check_request("login", Some("192.0.2.15"), Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_invalid_scope_is_rejected() {
    let response = app()
        .oneshot(check_request("bad:scope", Some("192.0.2.13"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["store"]["backend"], "memory");

    let response = app
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
