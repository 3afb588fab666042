use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use watchdog_core::Error;

/// Response wrapper mapping the core error type onto HTTP.
///
/// Carries the environment so production responses stay sanitized;
/// `Retry-After` is emitted for 423/429/503 when the error supplies it.
pub struct ApiError {
    pub error: Error,
    pub environment: String,
}

impl ApiError {
    pub fn new(error: Error, environment: impl Into<String>) -> Self {
        Self {
            error,
            environment: environment.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = self.error.to_api_response(&self.environment);
        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = self.error.retry_after_seconds {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}

/// Attach the standard `X-RateLimit-*` headers to a response.
pub fn set_rate_limit_headers(
    response: &mut Response,
    decision: &watchdog_core::RateLimitDecision,
) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert("x-ratelimit-reset", value);
    }
}
