//! Gateway HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router with proxy and streaming handlers
//! - Wire up middleware (tracing, request ID, timeout, rate limit)
//! - Translate inbound requests into `ProxyRequestConfig`
//! - Apply configuration reloads
//! - Serve until shutdown

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{request::Parts, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GatewayConfig, ListenerConfig};
use crate::error::GatewayError;
use crate::http::request::{request_id, request_id_layer};
use crate::lifecycle::Shutdown;
use crate::proxy::{rewrite::parse_query, ProxyRequestConfig, ServiceProxy};
use crate::security::client_ip::{extract_client_ip, TrustedClientIp};
use crate::security::rate_limit::{
    rate_limit_middleware, CallerIdentity, RateLimitPolicy, RateLimiter,
};

pub const X_SESSION_ID: &str = "x-session-id";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ServiceProxy>,
    pub limiter: Arc<RateLimiter>,
    pub max_body_size: usize,
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(state: AppState, config: &ListenerConfig) -> Self {
        Self {
            router: Self::build_router(state, config),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState, config: &ListenerConfig) -> Router {
        Router::new()
            .route("/api/{service}", any(proxy_handler))
            .route("/api/{service}/{*path}", any(proxy_handler))
            .route("/stream/{service}/{*path}", get(stream_handler))
            .layer(middleware::from_fn_with_state(
                state.limiter.clone(),
                rate_limit_middleware,
            ))
            // Liveness is not rate limited.
            .route("/health", get(health))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs,
            )))
            .layer(request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the shutdown signal fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(Shutdown::wait(shutdown))
            .await?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the proxy call for an inbound request under `/api/{service}/...`.
fn call_config(
    params: &HashMap<String, String>,
    parts: Parts,
) -> Result<ProxyRequestConfig, GatewayError> {
    let service = params
        .get("service")
        .cloned()
        .ok_or_else(|| GatewayError::InvalidRequest("missing service".into()))?;
    let path = format!("/{}", params.get("path").map(String::as_str).unwrap_or_default());

    let caller = match parts.extensions.get::<CallerIdentity>() {
        Some(caller) => caller.clone(),
        None => {
            let trusted = parts.extensions.get::<TrustedClientIp>().map(|t| t.0);
            let peer = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|c| c.0);
            CallerIdentity::anonymous(
                extract_client_ip(&parts.headers, trusted, peer).unwrap_or_default(),
            )
        }
    };
    let session_id = parts
        .headers
        .get(X_SESSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(ProxyRequestConfig {
        service,
        method: parts.method,
        path,
        query: parse_query(parts.uri.query()),
        headers: parts.headers,
        client_ip: Some(caller.client_ip).filter(|ip| !ip.is_empty()),
        session_id,
        user_id: caller.user_id,
        ..Default::default()
    })
}

/// Buffered proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request<Body>,
) -> Response {
    let request_id = request_id(request.headers()).to_string();
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return GatewayError::InvalidRequest(format!("unreadable body: {e}")).into_response()
        }
    };
    let mut config = match call_config(&params, parts) {
        Ok(config) => config,
        Err(e) => return e.into_response(),
    };
    if !body.is_empty() {
        config.body = Some(body);
    }

    tracing::debug!(
        request_id = %request_id,
        service = %config.service,
        method = %config.method,
        path = %config.path,
        "Proxying request"
    );

    match state.proxy.proxy(config).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Proxy call failed");
            e.into_response()
        }
    }
}

/// Server-sent events handler.
async fn stream_handler(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request<Body>,
) -> Response {
    let (parts, _body) = request.into_parts();
    let config = match call_config(&params, parts) {
        Ok(config) => config,
        Err(e) => return e.into_response(),
    };

    match state.proxy.proxy_stream(config).await {
        Ok(stream) => stream.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Apply validated configuration reloads until shutdown.
///
/// The rate-limit policy is swapped atomically. Services whose definition
/// changed are re-registered; services no longer listed are removed.
pub fn spawn_config_reload(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => apply_config(&state, config),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    })
}

pub fn apply_config(state: &AppState, config: GatewayConfig) {
    state
        .limiter
        .update_policy(RateLimitPolicy::from(&config.rate_limit));

    let balancer = state.proxy.balancer();
    for name in balancer.service_names() {
        if config.service(&name).is_none() {
            state.proxy.unregister_service(&name);
        }
    }
    for service in config.services {
        let unchanged = balancer
            .service(&service.name)
            .is_some_and(|existing| existing.config() == &service);
        if !unchanged {
            state.proxy.register_service(service);
        }
    }
    tracing::info!("Configuration applied");
}
