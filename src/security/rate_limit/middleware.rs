//! Admission middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::limiter::{set_limit_headers, CallerIdentity, RateLimiter};
use crate::config::RouteRateLimit;
use crate::error::GatewayError;
use crate::security::client_ip::{extract_client_ip, TrustedClientIp};

/// Identity resolved by an upstream auth layer, if any.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatedCaller {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// Admit or reject before routing.
///
/// Sets `X-RateLimit-*` on every response, plus `Retry-After` on rejection.
/// The resolved `CallerIdentity` is left in the request extensions.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let policy = limiter.policy();
    if !policy.enabled {
        return next.run(request).await;
    }

    let trusted = request.extensions().get::<TrustedClientIp>().map(|t| t.0);
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0);
    let client_ip = extract_client_ip(request.headers(), trusted, peer)
        .unwrap_or_else(|| "unknown".to_string());

    let auth = request
        .extensions()
        .get::<AuthenticatedCaller>()
        .cloned()
        .unwrap_or_default();
    let caller = CallerIdentity {
        user_id: auth.user_id,
        tenant_id: auth.tenant_id,
        client_ip,
    };

    // An explicit override attached by routing beats prefix matching.
    let route = request
        .extensions()
        .get::<RouteRateLimit>()
        .cloned()
        .or_else(|| policy.route_for(request.uri().path()).cloned());

    match limiter.check(&caller, route.as_ref()).await {
        Ok(decision) => {
            request.extensions_mut().insert(caller);
            let mut response = next.run(request).await;
            decision.apply_headers(response.headers_mut());
            response
        }
        Err(err) => {
            tracing::warn!(client = %caller.key(), error = %err, "Request rejected by rate limiter");
            let headers = match &err {
                GatewayError::RateLimited {
                    limit,
                    reset_time_ms,
                    ..
                } => Some((*limit, *reset_time_ms)),
                _ => None,
            };
            let mut response = err.into_response();
            if let Some((limit, reset_time_ms)) = headers {
                set_limit_headers(response.headers_mut(), limit, 0, reset_time_ms);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::rate_limit::{limiter::RateLimitPolicy, memory::MemoryStore};
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route(
                "/echo",
                get(|request: Request<Body>| async move {
                    request
                        .extensions()
                        .get::<CallerIdentity>()
                        .map(|c| c.key())
                        .unwrap_or_default()
                }),
            )
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn request(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/echo")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_headers_on_admit_and_reject() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitPolicy {
                anonymous_limit: 2,
                ..Default::default()
            },
        ));
        let app = app(limiter);

        let response = app.clone().oneshot(request("198.51.100.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
        assert!(!response.headers().contains_key("retry-after"));

        app.clone().oneshot(request("198.51.100.4")).await.unwrap();
        let rejected = app.clone().oneshot(request("198.51.100.4")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()["x-ratelimit-remaining"], "0");
        assert!(rejected.headers().contains_key("retry-after"));

        // A different client has its own window.
        let other = app.oneshot(request("198.51.100.5")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_caller_identity_is_forwarded() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitPolicy::default(),
        ));
        let mut req = request("198.51.100.4");
        req.extensions_mut().insert(AuthenticatedCaller {
            user_id: Some("42".into()),
            tenant_id: None,
        });

        let response = app(limiter).oneshot(req).await.unwrap();
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"user:42");
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let limiter = Arc::new(RateLimiter::new(
            Arc::new(MemoryStore::new()),
            RateLimitPolicy {
                enabled: false,
                ..Default::default()
            },
        ));
        let response = app(limiter).oneshot(request("1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}
