//! Gateway error taxonomy.
//!
//! # Classes
//! - Admission: `RateLimited` (never reaches the proxy, never retried)
//! - Availability: `CircuitOpen`, `NoInstances` (no upstream call attempted)
//! - Upstream: `Upstream`, `Connect`, `Timeout`, `RetriesExhausted`, `StreamIdle`
//! - Caller: `InvalidRequest`
//!
//! # Design Decisions
//! - Every variant maps to exactly one HTTP status
//! - Variants carry the service name so callers can log without extra context

use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Result alias used throughout the gateway core.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// A typed failure surfaced by the traffic-resilience core.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        limit: u64,
        reset_time_ms: u64,
        retry_after_secs: u64,
    },

    #[error("service {service} is unavailable: circuit open")]
    CircuitOpen { service: String },

    #[error("bad gateway: no instances available for {service}")]
    NoInstances { service: String },

    #[error("bad gateway: {service} responded with {status}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },

    /// Transport failure on a call that is not retried (stream setup).
    #[error("bad gateway: could not connect to {service}: {error}")]
    Connect { service: String, error: String },

    #[error("gateway timeout: {service} did not respond within {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("gateway timeout: {service} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("gateway timeout: stream from {service} idle for {idle:?}")]
    StreamIdle { service: String, idle: Duration },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// HTTP status the caller should see for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoInstances { .. }
            | GatewayError::Upstream { .. }
            | GatewayError::Connect { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. }
            | GatewayError::RetriesExhausted { .. }
            | GatewayError::StreamIdle { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable machine-readable kind, used as the `error` field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "service_unavailable",
            GatewayError::NoInstances { .. } => "no_instances",
            GatewayError::Upstream { .. } => "bad_gateway",
            GatewayError::Connect { .. } => "connect_failed",
            GatewayError::Timeout { .. } => "gateway_timeout",
            GatewayError::RetriesExhausted { .. } => "retries_exhausted",
            GatewayError::StreamIdle { .. } => "stream_idle",
            GatewayError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// True for failures that never involved an upstream call.
    pub fn is_availability(&self) -> bool {
        matches!(
            self,
            GatewayError::CircuitOpen { .. } | GatewayError::NoInstances { .. }
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let open = GatewayError::CircuitOpen {
            service: "farm-service".into(),
        };
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(open.is_availability());

        let exhausted = GatewayError::RetriesExhausted {
            service: "farm-service".into(),
            attempts: 4,
            last_error: "status 503".into(),
        };
        assert_eq!(exhausted.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert!(!exhausted.is_availability());

        let none = GatewayError::NoInstances {
            service: "farm-service".into(),
        };
        assert_eq!(none.status_code(), StatusCode::BAD_GATEWAY);

        let connect = GatewayError::Connect {
            service: "live-feed".into(),
            error: "connection refused".into(),
        };
        assert_eq!(connect.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(connect.kind(), "connect_failed");
        assert!(!connect.is_availability());
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let err = GatewayError::RateLimited {
            limit: 100,
            reset_time_ms: 0,
            retry_after_secs: 42,
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("retry-after").unwrap(), "42");
    }
}
