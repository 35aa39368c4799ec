//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use traffic_gateway::config::{
    CircuitBreakerConfig, InstanceConfig, ProxyDefaults, ServiceConfig, ServiceProxyConfig,
};
use traffic_gateway::lifecycle::Shutdown;
use traffic_gateway::load_balancer::LoadBalancer;
use traffic_gateway::net::build_client;
use traffic_gateway::observability::EventBus;
use traffic_gateway::proxy::ServiceProxy;
use traffic_gateway::resilience::CircuitBreakerRegistry;

/// Canned response from a programmable backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            content_type: "application/json",
            ..Self::text(status, body)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Read one request head (and any declared body) off the socket.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let declared = head
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < end + 4 + declared {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Start a programmable backend on an ephemeral port.
///
/// `f` receives the raw request text and decides the response.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let response = f(request).await;
                if !response.delay.is_zero() {
                    tokio::time::sleep(response.delay).await;
                }
                let raw = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.status,
                    reason(response.status),
                    response.content_type,
                    response.body.len(),
                    response.body
                );
                let _ = socket.write_all(raw.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Backend that always answers with the same response.
pub async fn start_mock_backend(response: MockResponse) -> SocketAddr {
    start_programmable_backend(move |_| {
        let response = response.clone();
        async move { response }
    })
    .await
}

/// SSE backend: sends `events` with a pause before each, then either ends
/// the stream or holds the connection open silently.
pub async fn start_sse_backend(
    events: Vec<&'static str>,
    pause: Duration,
    hold_open: bool,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let events = events.clone();
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for event in events {
                    tokio::time::sleep(pause).await;
                    let frame = format!("{:x}\r\n{}\r\n", event.len(), event);
                    if socket.write_all(frame.as_bytes()).await.is_err() {
                        return;
                    }
                }
                if hold_open {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                let _ = socket.write_all(b"0\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn instance(id: &str, addr: SocketAddr) -> InstanceConfig {
    InstanceConfig::new(id, addr.ip().to_string(), addr.port())
}

/// Service with fast retries so tests do not wait on default backoff.
pub fn service(name: &str, instances: Vec<InstanceConfig>, retries: u32) -> ServiceConfig {
    let mut config = ServiceConfig::new(name, instances);
    config.proxy = ServiceProxyConfig {
        retries: Some(retries),
        retry_delay_ms: Some(10),
        timeout_ms: Some(2_000),
        ..Default::default()
    };
    config
}

pub fn build_proxy(services: Vec<ServiceConfig>) -> Arc<ServiceProxy> {
    let events = EventBus::new();
    let client = build_client();
    let balancer = Arc::new(LoadBalancer::new(
        client.clone(),
        events.clone(),
        Shutdown::new(),
    ));
    let circuits = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::default(),
        events,
    ));
    let proxy = Arc::new(ServiceProxy::new(
        client,
        balancer,
        circuits,
        ProxyDefaults::default(),
    ));
    for service in services {
        proxy.register_service(service);
    }
    proxy
}
