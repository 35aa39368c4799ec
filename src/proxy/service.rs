//! The Service Proxy.
//!
//! One call = one circuit-guarded unit of work: select an instance once,
//! then attempt the request up to `retries + 1` times against it.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, response::Parts, HeaderMap, HeaderValue, Request};
use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use tokio::time::{self, Instant};
use url::Url;

use crate::config::{ProxyDefaults, ServiceConfig, ServiceProxyConfig};
use crate::error::{GatewayError, Result};
use crate::load_balancer::{Instance, LoadBalancer};
use crate::net::HttpClient;
use crate::observability::metrics;
use crate::proxy::body::parse_body;
use crate::proxy::request::{ProxyRequest, ProxyRequestConfig, ProxyResponse, X_REQUEST_ID};
use crate::proxy::rewrite::{build_target_url, rewrite_path};
use crate::resilience::{CircuitBreakerRegistry, RetryPolicy};
use crate::security::headers::filter_hop_by_hop;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Per-call settings after layering call, service and gateway values.
#[derive(Debug, Clone)]
pub(crate) struct CallSettings {
    pub timeout: Duration,
    pub policy: RetryPolicy,
    pub strip_prefix: Option<String>,
    pub add_prefix: Option<String>,
    pub preserve_host: bool,
}

pub struct ServiceProxy {
    client: HttpClient,
    balancer: Arc<LoadBalancer>,
    circuits: Arc<CircuitBreakerRegistry>,
    defaults: ProxyDefaults,
    services: DashMap<String, ServiceProxyConfig>,
}

impl ServiceProxy {
    pub fn new(
        client: HttpClient,
        balancer: Arc<LoadBalancer>,
        circuits: Arc<CircuitBreakerRegistry>,
        defaults: ProxyDefaults,
    ) -> Self {
        Self {
            client,
            balancer,
            circuits,
            defaults,
            services: DashMap::new(),
        }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Register a service with the balancer, its circuit override and its
    /// proxy settings. Re-registering replaces all three.
    pub fn register_service(&self, config: ServiceConfig) {
        match &config.circuit_breaker {
            Some(breaker) => self.circuits.configure(&config.name, breaker.clone()),
            None => self.circuits.clear_override(&config.name),
        }
        self.services
            .insert(config.name.clone(), config.proxy.clone());
        self.balancer.register_service(config);
    }

    /// Remove a service. Its breaker stays but reverts to the default thresholds.
    pub fn unregister_service(&self, name: &str) -> bool {
        self.services.remove(name);
        self.circuits.clear_override(name);
        self.balancer.unregister_service(name)
    }

    pub(crate) fn settings_for(&self, request: &ProxyRequestConfig) -> CallSettings {
        let service = self
            .services
            .get(&request.service)
            .map(|s| s.value().clone())
            .unwrap_or_default();

        let mut policy = RetryPolicy::from_config(&self.defaults, &service);
        if let Some(retries) = request.retries {
            policy = policy.with_retries(retries);
        }

        CallSettings {
            timeout: request.timeout.unwrap_or_else(|| {
                Duration::from_millis(service.timeout_ms.unwrap_or(self.defaults.timeout_ms))
            }),
            policy,
            strip_prefix: request.strip_prefix.clone().or(service.strip_prefix),
            add_prefix: request.add_prefix.clone().or(service.add_prefix),
            preserve_host: request.preserve_host.unwrap_or(service.preserve_host),
        }
    }

    /// Execute one call against `request.service`.
    ///
    /// 4xx responses are returned as `Ok`. A final 5xx, exhausted retries,
    /// a timeout, an open circuit and an empty pool are errors.
    pub async fn proxy(&self, request: ProxyRequestConfig) -> Result<ProxyResponse> {
        let service = request.service.clone();
        let started = Instant::now();

        let result = self
            .circuits
            .execute_with_fallback(
                &service,
                || self.forward(&request),
                |err| {
                    tracing::warn!(service = %service, error = %err, "Service unavailable");
                    Err(err)
                },
            )
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_request(&service, outcome, started.elapsed());
        result
    }

    async fn forward(&self, request: &ProxyRequestConfig) -> Result<ProxyResponse> {
        let service = request.service.as_str();
        let settings = self.settings_for(request);
        let instance = self.select(request)?;

        let outbound = self.prepare(request, &settings, &instance)?;
        let request_id = outbound
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let policy = &settings.policy;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let http_request = outbound.to_http()?;
            let guard = self.balancer.begin_request(service, instance.clone());
            let started = Instant::now();

            tracing::debug!(
                request_id = %request_id,
                service = %service,
                instance = %instance.id(),
                attempt,
                url = %outbound.url,
                "Forwarding request"
            );

            let last_error = match time::timeout(settings.timeout, self.send(http_request)).await {
                Ok(Ok((parts, bytes))) => {
                    let status = parts.status.as_u16();
                    guard.finish(!parts.status.is_server_error());

                    if !policy.is_retryable_status(status) {
                        if parts.status.is_server_error() {
                            return Err(GatewayError::Upstream {
                                service: service.to_string(),
                                status,
                                body: String::from_utf8_lossy(&bytes).into_owned(),
                            });
                        }
                        return Ok(self.finish_response(request, &instance, parts, bytes, started));
                    }
                    format!("upstream responded with {status}")
                }
                Ok(Err(e)) => {
                    guard.finish(false);
                    tracing::warn!(
                        request_id = %request_id,
                        service = %service,
                        instance = %instance.id(),
                        attempt,
                        error = %e,
                        "Upstream error"
                    );
                    e.to_string()
                }
                Err(_) => {
                    guard.finish(false);
                    tracing::warn!(
                        request_id = %request_id,
                        service = %service,
                        instance = %instance.id(),
                        attempt,
                        timeout = ?settings.timeout,
                        "Upstream timed out"
                    );
                    if !policy.has_attempts_left(attempt) {
                        return Err(GatewayError::Timeout {
                            service: service.to_string(),
                            timeout: settings.timeout,
                        });
                    }
                    format!("timed out after {:?}", settings.timeout)
                }
            };

            if !policy.has_attempts_left(attempt) {
                tracing::error!(
                    request_id = %request_id,
                    service = %service,
                    attempts = attempt,
                    last_error = %last_error,
                    "Retries exhausted"
                );
                return Err(GatewayError::RetriesExhausted {
                    service: service.to_string(),
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = policy.delay_for(attempt);
            metrics::record_retry(service);
            tracing::info!(
                request_id = %request_id,
                service = %service,
                attempt,
                delay = ?delay,
                reason = %last_error,
                "Retrying request"
            );
            time::sleep(delay).await;
        }
    }

    pub(crate) fn select(&self, request: &ProxyRequestConfig) -> Result<Arc<Instance>> {
        self.balancer
            .get_next_instance(&request.service, &request.selection_context())
            .ok_or_else(|| GatewayError::NoInstances {
                service: request.service.clone(),
            })
    }

    /// Rewrite, filter and transform the outbound request.
    pub(crate) fn prepare(
        &self,
        request: &ProxyRequestConfig,
        settings: &CallSettings,
        instance: &Instance,
    ) -> Result<ProxyRequest> {
        let path = rewrite_path(
            &request.path,
            settings.strip_prefix.as_deref(),
            settings.add_prefix.as_deref(),
        );
        let url = build_target_url(&instance.base_url(), &path, &request.query)?;
        let headers = forward_headers(&request.headers, &url, settings.preserve_host);

        let mut outbound = ProxyRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone().unwrap_or_default(),
        };
        if let Some(transform) = &request.transform_request {
            transform(&mut outbound);
        }
        Ok(outbound)
    }

    async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<(Parts, Bytes), BoxError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await?.to_bytes();
        Ok((parts, bytes))
    }

    fn finish_response(
        &self,
        request: &ProxyRequestConfig,
        instance: &Instance,
        parts: Parts,
        bytes: Bytes,
        started: Instant,
    ) -> ProxyResponse {
        let headers = filter_hop_by_hop(&parts.headers);
        let body = parse_body(&headers, bytes.clone());
        let response = ProxyResponse {
            status: parts.status,
            headers,
            body,
            raw_body: Some(bytes),
            response_time: started.elapsed(),
            instance_id: instance.id().to_string(),
        };
        match &request.transform_response {
            Some(transform) => {
                let original = response.body.clone();
                let mut transformed = transform(response);
                if transformed.body != original {
                    transformed.raw_body = None;
                }
                transformed
            }
            None => response,
        }
    }
}

/// Strip hop-by-hop headers, point `host` at the instance unless preserved,
/// and make sure a request id travels upstream.
pub(crate) fn forward_headers(incoming: &HeaderMap, url: &Url, preserve_host: bool) -> HeaderMap {
    let mut headers = filter_hop_by_hop(incoming);
    headers.remove(header::CONTENT_LENGTH);

    if !preserve_host || !headers.contains_key(header::HOST) {
        let authority = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        };
        if let Ok(value) = HeaderValue::from_str(&authority) {
            headers.insert(header::HOST, value);
        }
    }

    if !headers.contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
            headers.insert(X_REQUEST_ID, value);
        }
    }
    headers
}
