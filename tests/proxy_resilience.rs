//! Service proxy behaviour against live mock upstreams.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use traffic_gateway::config::CircuitBreakerConfig;
use traffic_gateway::proxy::{ProxyRequestConfig, ResponseBody};
use traffic_gateway::resilience::CircuitState;
use traffic_gateway::GatewayError;

mod common;
use common::{MockResponse, build_proxy, instance, service};

fn counting_backend(
    calls: Arc<AtomicU32>,
    respond: fn(u32) -> MockResponse,
) -> impl Fn(String) -> std::future::Ready<MockResponse> + Send + Sync + 'static {
    move |_| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        std::future::ready(respond(n))
    }
}

#[tokio::test]
async fn test_retry_then_success() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = common::start_programmable_backend(counting_backend(calls.clone(), |n| {
        if n == 0 {
            MockResponse::text(503, "busy")
        } else {
            MockResponse::json(200, r#"{"farms":[1,2]}"#)
        }
    }))
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 2)]);
    let response = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body.as_json(),
        Some(&serde_json::json!({"farms": [1, 2]}))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = proxy.balancer().service_stats("farm-service").unwrap();
    assert_eq!(stats.instances[0].total_requests, 2);
    assert_eq!(stats.instances[0].failed_requests, 1);
    assert_eq!(stats.instances[0].active_connections, 0);
}

#[tokio::test]
async fn test_retryable_status_exhausts_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = common::start_programmable_backend(counting_backend(calls.clone(), |_| {
        MockResponse::text(503, "still busy")
    }))
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 1)]);
    let err = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap_err();

    match err {
        GatewayError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected retries exhausted, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_retryable_5xx_is_bad_gateway() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = common::start_programmable_backend(counting_backend(calls.clone(), |_| {
        MockResponse::text(500, "boom")
    }))
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 3)]);
    let err = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    assert!(matches!(err, GatewayError::Upstream { status: 500, ref body, .. } if body == "boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_error_passes_through() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = common::start_programmable_backend(counting_backend(calls.clone(), |_| {
        MockResponse::json(404, r#"{"message":"no such farm"}"#)
    }))
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 3)]);
    let response = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms/99"))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        proxy.circuits().get_stats("farm-service").unwrap().failed_requests,
        0
    );
}

#[tokio::test]
async fn test_hop_by_hop_headers_stripped() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let addr = common::start_programmable_backend(move |request| {
        let _ = tx.send(request);
        std::future::ready(MockResponse::text(200, "ok"))
    })
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 0)]);
    let mut headers = HeaderMap::new();
    headers.insert("connection", HeaderValue::from_static("keep-alive, x-hop"));
    headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
    headers.insert("proxy-authorization", HeaderValue::from_static("Basic abc"));
    headers.insert("upgrade", HeaderValue::from_static("websocket"));
    headers.insert("te", HeaderValue::from_static("trailers"));
    headers.insert("x-hop", HeaderValue::from_static("1"));
    headers.insert("x-tenant-id", HeaderValue::from_static("acme"));
    headers.insert("host", HeaderValue::from_static("gateway.example"));

    let call = ProxyRequestConfig::new("farm-service", Method::POST, "/farms")
        .with_query("dry_run", "true")
        .with_headers(headers)
        .with_body(r#"{"name":"north"}"#);
    let response = proxy.proxy(call).await.unwrap();
    assert_eq!(response.body, ResponseBody::Text("ok".into()));

    let seen = rx.recv().await.unwrap().to_ascii_lowercase();
    assert!(seen.starts_with("post /farms?dry_run=true http/1.1"));
    for stripped in ["keep-alive:", "proxy-authorization:", "upgrade:", "te:", "x-hop:"] {
        assert!(!seen.contains(&format!("\r\n{stripped}")), "{stripped} leaked upstream");
    }
    assert!(seen.contains("\r\nx-tenant-id: acme"));
    assert!(seen.contains("\r\nx-request-id: "));
    assert!(seen.contains(&format!("\r\nhost: {addr}")));
    assert!(seen.ends_with(r#"{"name":"north"}"#));
}

#[tokio::test]
async fn test_timeout_on_last_attempt() {
    let addr = common::start_mock_backend(
        MockResponse::text(200, "late").delayed(Duration::from_millis(500)),
    )
    .await;

    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 3)]);
    let err = proxy
        .proxy(
            ProxyRequestConfig::get("farm-service", "/slow")
                .with_timeout(Duration::from_millis(100))
                .with_retries(0),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Timeout { .. }));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_connection_failures_exhaust_retries() {
    let addr = common::closed_port().await;
    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 1)]);

    let err = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap_err();
    match err {
        GatewayError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected retries exhausted, got {other:?}"),
    }
    let stats = proxy.balancer().service_stats("farm-service").unwrap();
    assert_eq!(stats.instances[0].failed_requests, 2);
}

#[tokio::test]
async fn test_circuit_opens_and_blocks_upstream() {
    let calls = Arc::new(AtomicU32::new(0));
    let addr = common::start_programmable_backend(counting_backend(calls.clone(), |_| {
        MockResponse::text(500, "down")
    }))
    .await;

    let mut config = service("farm-service", vec![instance("A", addr)], 0);
    config.circuit_breaker = Some(CircuitBreakerConfig {
        failure_threshold: 2,
        volume_threshold: 2,
        ..Default::default()
    });
    let proxy = build_proxy(vec![config]);

    for _ in 0..2 {
        let err = proxy
            .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { .. }));
    }
    assert_eq!(proxy.circuits().get_state("farm-service"), CircuitState::Open);

    let err = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_no_eligible_instances() {
    let addr = common::start_mock_backend(MockResponse::text(200, "ok")).await;
    let proxy = build_proxy(vec![service("farm-service", vec![instance("A", addr)], 0)]);
    proxy.balancer().mark_unhealthy("farm-service", "A");

    let err = proxy
        .proxy(ProxyRequestConfig::get("farm-service", "/farms"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NoInstances { .. }));
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_prefix_rewrite_and_transforms() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let addr = common::start_programmable_backend(move |request| {
        let _ = tx.send(request);
        std::future::ready(MockResponse::json(200, r#"{"n":1}"#))
    })
    .await;

    let mut config = service("farm-service", vec![instance("A", addr)], 0);
    config.proxy.strip_prefix = Some("/farm-service".into());
    config.proxy.add_prefix = Some("/v2".into());
    let proxy = build_proxy(vec![config]);

    let call = ProxyRequestConfig::get("farm-service", "/farm-service/farms")
        .with_request_transform(|req| {
            req.headers
                .insert("x-signed", HeaderValue::from_static("yes"));
        })
        .with_response_transform(|mut res| {
            res.body = ResponseBody::Text("replaced".into());
            res
        });
    let response = proxy.proxy(call).await.unwrap();
    assert_eq!(response.body.as_text(), Some("replaced"));
    assert!(response.raw_body.is_none());
    assert_eq!(response.instance_id, "A");

    let seen = rx.recv().await.unwrap().to_ascii_lowercase();
    assert!(seen.starts_with("get /v2/farms http/1.1"));
    assert!(seen.contains("\r\nx-signed: yes"));
}
