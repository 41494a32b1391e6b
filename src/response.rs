use serde::Serialize;

use crate::limiter::RateLimitResult;

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub scope: String,
    pub identity: String,
    pub allowed: bool,
    pub limit: u32,
    pub attempts_remaining: u32,
    pub attempts_used: u32,
    pub retry_after_ms: u64,
}

impl CheckResponse {
    pub fn new(scope: &str, identity: &str, limit: u32, result: &RateLimitResult) -> Self {
        Self {
            scope: scope.to_string(),
            identity: identity.to_string(),
            allowed: result.allowed(),
            limit,
            attempts_remaining: result.attempts_remaining,
            attempts_used: result.attempts_used,
            retry_after_ms: result.retry_after.as_millis() as u64,
        }
    }

    /// Whole seconds for the `Retry-After` header, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_ms.div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_blocked_response() {
        let result = RateLimitResult {
            attempts_remaining: 0,
            attempts_used: 3,
            retry_after: Duration::from_millis(1200),
            blocked: true,
        };
        let response = CheckResponse::new("login", "1.2.3.4", 3, &result);
        assert!(!response.allowed);
        assert_eq!(response.retry_after_ms, 1200);
        assert_eq!(response.retry_after_secs(), 2);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"attempts_used\":3"));
    }
}
