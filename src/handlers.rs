use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::context::Context;
use crate::error::LimiterError;
use crate::health::HealthChecker;
use crate::limiter::{CheckRequest, RateLimiter};
use crate::middleware::client_ip_from_headers;
use crate::policy::PolicyConfig;
use crate::response::CheckResponse;
use crate::store::KeyValueStore;

/// Shared application state
pub type SharedState<S> = Arc<AppState<S>>;

pub struct AppState<S> {
    pub limiter: RateLimiter<S>,
    pub policies: PolicyConfig,
    pub health: HealthChecker<S>,
}

impl<S: KeyValueStore + 'static> AppState<S> {
    pub fn new(limiter: RateLimiter<S>, policies: PolicyConfig) -> SharedState<S> {
        let health = HealthChecker::new(limiter.clone());
        Arc::new(Self {
            limiter,
            policies,
            health,
        })
    }
}

/// Optional body of a check; anything left out comes from the scope's policy
/// and the client address.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CheckBody {
    #[validate(length(min = 1, max = 256))]
    pub identity: Option<String>,
    #[validate(range(min = 1))]
    pub max_attempts: Option<u32>,
    #[validate(range(min = 1))]
    pub window_ms: Option<u64>,
}

/// Record an attempt for a scope
pub async fn check_rate_limit<S: KeyValueStore + 'static>(
    State(state): State<SharedState<S>>,
    Path(scope): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<CheckBody>, JsonRejection>,
) -> Result<Response, LimiterError> {
    let body = match body {
        Ok(Json(body)) => body,
        // no JSON body sent: everything comes from the policy and the client
        Err(JsonRejection::MissingJsonContentType(_)) => CheckBody::default(),
        Err(rejection) => return Err(LimiterError::Validation(rejection.body_text())),
    };
    body.validate()
        .map_err(|e| LimiterError::Validation(e.to_string()))?;

    let identity = body
        .identity
        .clone()
        .or_else(|| client_ip_from_headers(&headers))
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .ok_or_else(|| {
            LimiterError::Validation("identity missing and no client address known".to_string())
        })?;

    let policy = state.policies.get_policy(&scope);
    let max_attempts = body.max_attempts.unwrap_or(policy.max_attempts);
    let window = body
        .window_ms
        .map(Duration::from_millis)
        .unwrap_or(policy.window);

    let request = CheckRequest::new(scope, identity, max_attempts, window);
    let result = state
        .limiter
        .check(&Context::background(), &request)
        .await?;

    let body = CheckResponse::new(&request.scope, &request.identity, max_attempts, &result);
    let retry_after_secs = body.retry_after_secs();
    let retry_after_ms = body.retry_after_ms;
    let mut resp = Json(body).into_response();

    let resp_headers = resp.headers_mut();
    resp_headers.insert("x-ratelimit-limit", HeaderValue::from(max_attempts));
    resp_headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(result.attempts_remaining),
    );
    resp_headers.insert("x-ratelimit-reset-ms", HeaderValue::from(retry_after_ms));

    if result.blocked {
        *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        resp.headers_mut()
            .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    }

    Ok(resp)
}

/// Health check endpoint
pub async fn health_check<S: KeyValueStore + 'static>(
    State(state): State<SharedState<S>>,
) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check<S: KeyValueStore + 'static>(
    State(state): State<SharedState<S>>,
) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_body_validation() {
        let empty_identity = CheckBody {
            identity: Some(String::new()),
            ..CheckBody::default()
        };
        assert!(empty_identity.validate().is_err());

        let zero_attempts = CheckBody {
            max_attempts: Some(0),
            ..CheckBody::default()
        };
        assert!(zero_attempts.validate().is_err());

        assert!(CheckBody::default().validate().is_ok());
    }
}
