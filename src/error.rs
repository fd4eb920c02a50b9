use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Rate Limit Exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    #[error("Upstream Error: {0}")]
    UpstreamError(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::RateLimitExceeded { .. } => "rate_limited",
            Self::UpstreamError(_) => "upstream_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::ValidationError(m)
            | Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::UpstreamError(m)
            | Self::ServiceUnavailable(m) => m.clone(),
            Self::RateLimitExceeded { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.message();

        let body = Json(json!({
            "code": code,
            "message": message
        }));

        let mut response = (status, body).into_response();

        // Retry-After is whole seconds, rounded up.
        if let Self::RateLimitExceeded {
            retry_after: Some(wait),
        } = self
        {
            let secs = wait.as_secs_f64().ceil().max(1.0) as u64;
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

/// Failures talking to the shared bucket store. Never shown to callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::OperationFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let resp = ApiError::RateLimitExceeded {
            retry_after: Some(Duration::from_millis(2_100)),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_rate_limited_without_hint_has_no_header() {
        let resp = ApiError::RateLimitExceeded { retry_after: None }.into_response();
        assert!(resp.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_unauthorized_is_distinct_from_rate_limit() {
        let resp = ApiError::Unauthorized("Unauthorized".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
