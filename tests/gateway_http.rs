//! End-to-end tests through the gateway router.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use futures_util::StreamExt;
use tower::ServiceExt;

use traffic_gateway::config::{HealthCheckConfig, ListenerConfig};
use traffic_gateway::http::{AppState, GatewayServer};
use traffic_gateway::load_balancer::{Health, SelectionContext};
use traffic_gateway::proxy::{ProxyRequestConfig, ServiceProxy};
use traffic_gateway::security::rate_limit::{MemoryStore, RateLimitPolicy, RateLimiter};
use traffic_gateway::GatewayError;

mod common;
use common::{build_proxy, instance, service, MockResponse};

fn router(proxy: Arc<ServiceProxy>, policy: RateLimitPolicy) -> Router {
    let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new()), policy));
    GatewayServer::build_router(
        AppState {
            proxy,
            limiter,
            max_body_size: 1024 * 1024,
        },
        &ListenerConfig::default(),
    )
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.23")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_proxied_request_carries_limit_headers() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let addr = common::start_programmable_backend(move |request| {
        seen.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(request);
        std::future::ready(MockResponse::json(200, r#"{"ok":true}"#))
    })
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 0)]);
    let app = router(
        proxy,
        RateLimitPolicy {
            anonymous_limit: 2,
            ..Default::default()
        },
    );

    let response = app
        .clone()
        .oneshot(get("/api/farm-service/farms?page=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    assert!(response.headers().contains_key("x-request-id"));
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], br#"{"ok":true}"#);

    let upstream = rx.recv().await.unwrap().to_ascii_lowercase();
    assert!(upstream.starts_with("get /farms?page=2 http/1.1"));

    app.clone().oneshot(get("/api/farm-service/farms")).await.unwrap();
    let rejected = app.clone().oneshot(get("/api/farm-service/farms")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rejected.headers()["x-ratelimit-remaining"], "0");
    assert!(rejected.headers().contains_key("retry-after"));

    // Rejections never reach the upstream.
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Liveness is outside the limiter.
    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_json_body_is_relayed_byte_for_byte() {
    let upstream = r#"{"zeta":1,"alpha":2,"id":12345678901234567890123}"#;
    let addr = common::start_mock_backend(MockResponse::json(200, upstream)).await;
    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 0)]);
    let app = router(proxy, RateLimitPolicy::default());

    let response = app.oneshot(get("/api/farm-service/farms/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], upstream.as_bytes());
}

#[tokio::test]
async fn test_gateway_errors_render_as_json() {
    let proxy = build_proxy(Vec::new());
    let app = router(proxy, RateLimitPolicy::default());

    let response = app.oneshot(get("/api/ghost-service/anything")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "no_instances");
}

#[tokio::test]
async fn test_sse_stream_is_relayed() {
    let addr = common::start_sse_backend(
        vec!["data: one\n\n", "data: two\n\n", "data: three\n\n"],
        Duration::from_millis(20),
        false,
    )
    .await;
    let proxy = build_proxy(vec![service("live-feed", vec![instance("A", addr)], 0)]);
    let app = router(proxy, RateLimitPolicy::default());

    let response = app.oneshot(get("/stream/live-feed/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    assert_eq!(&body[..], b"data: one\n\ndata: two\n\ndata: three\n\n");
}

#[tokio::test]
async fn test_idle_stream_is_aborted() {
    let addr = common::start_sse_backend(vec!["data: hello\n\n"], Duration::ZERO, true).await;
    let proxy = build_proxy(vec![service("live-feed", vec![instance("A", addr)], 0)]);

    let stream = proxy
        .proxy_stream(
            ProxyRequestConfig::get("live-feed", "/events")
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    let mut body = stream.body;

    let first = body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"data: hello\n\n");

    let aborted = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap();
    match aborted {
        Err(GatewayError::StreamIdle { idle, .. }) => assert_eq!(idle, Duration::from_millis(200)),
        other => panic!("expected idle abort, got {other:?}"),
    }
    assert!(body.next().await.is_none());

    let stats = proxy.circuits().get_stats("live-feed").unwrap();
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test]
async fn test_stream_connect_failure_is_not_a_retry() {
    let addr = common::closed_port().await;
    let proxy = build_proxy(vec![service("live-feed", vec![instance("A", addr)], 3)]);

    let err = proxy
        .proxy_stream(ProxyRequestConfig::get("live-feed", "/events"))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::Connect { .. }), "got {err:?}");
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

    let stats = proxy.balancer().service_stats("live-feed").unwrap();
    assert_eq!(stats.instances[0].total_requests, 1);
    assert_eq!(stats.instances[0].failed_requests, 1);
    assert_eq!(proxy.circuits().get_stats("live-feed").unwrap().failed_requests, 1);
}

#[tokio::test]
async fn test_client_disconnect_releases_connection() {
    let addr = common::start_sse_backend(vec!["data: hello\n\n"], Duration::ZERO, true).await;
    let proxy = build_proxy(vec![service("live-feed", vec![instance("A", addr)], 0)]);

    let stream = proxy
        .proxy_stream(ProxyRequestConfig::get("live-feed", "/events"))
        .await
        .unwrap();
    let active = || {
        proxy.balancer().service_stats("live-feed").unwrap().instances[0].active_connections
    };
    assert_eq!(active(), 1);

    drop(stream);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(active(), 0);
}

#[tokio::test]
async fn test_health_probe_evicts_failing_instance() {
    let healthy = common::start_mock_backend(MockResponse::text(200, "a")).await;
    let failing = common::start_programmable_backend(|request| {
        let response = if request.starts_with("GET /health") {
            MockResponse::text(503, "sick")
        } else {
            MockResponse::text(200, "b")
        };
        std::future::ready(response)
    })
    .await;

    let mut config = service(
        "farm-service",
        vec![instance("A", healthy), instance("B", failing)],
        0,
    );
    config.health_check = HealthCheckConfig {
        enabled: true,
        interval_ms: 100,
        path: "/health".into(),
        timeout_ms: 500,
    };
    let proxy = build_proxy(vec![config]);
    let balancer = proxy.balancer();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = balancer.service_stats("farm-service").unwrap();
    assert_eq!(snapshot.instances[0].health, Health::Healthy);
    assert_eq!(snapshot.instances[1].health, Health::Unhealthy);
    assert!(snapshot.instances[1].last_health_check.is_some());

    for _ in 0..10 {
        let pick = balancer
            .get_next_instance("farm-service", &SelectionContext::default())
            .unwrap();
        assert_eq!(pick.id(), "A");
    }

    // Unregistering stops the prober and the service disappears.
    assert!(proxy.unregister_service("farm-service"));
    assert!(balancer.service_stats("farm-service").is_none());
}
