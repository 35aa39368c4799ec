//! Streaming (SSE) variant of the Service Proxy.
//!
//! Connecting is a single attempt: a transport failure surfaces as
//! `Connect` (502), a 5xx as `Upstream`, a missed deadline as `Timeout`.
//! The upstream body is pumped by a spawned task into a bounded channel.
//! The task ends when the upstream finishes, when no bytes arrive for the
//! idle window, or when the receiving side is dropped (client gone).

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::Stream;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::error::{GatewayError, Result};
use crate::load_balancer::RequestGuard;
use crate::proxy::request::ProxyRequestConfig;
use crate::proxy::service::ServiceProxy;
use crate::resilience::CircuitBreaker;
use crate::security::headers::filter_hop_by_hop;

const CHANNEL_CAPACITY: usize = 32;

/// Chunks relayed from upstream, ending with an error if the stream aborts.
pub struct ProxyStream {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl Stream for ProxyStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub struct StreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub instance_id: String,
    pub body: ProxyStream,
}

impl IntoResponse for StreamResponse {
    fn into_response(self) -> Response {
        let mut headers = filter_hop_by_hop(&self.headers);
        headers.remove(header::CONTENT_LENGTH);
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

impl ServiceProxy {
    /// Open a streaming call. Only connection setup is circuit-guarded and
    /// it is never retried; the idle window defaults to twice the timeout.
    pub async fn proxy_stream(&self, request: ProxyRequestConfig) -> Result<StreamResponse> {
        let service = request.service.clone();
        let settings = self.settings_for(&request);
        let idle = settings.timeout * 2;

        let (response, guard) = self
            .circuits()
            .execute(&service, || async {
                let instance = self.select(&request)?;
                let outbound = self.prepare(&request, &settings, &instance)?;
                let http_request = outbound.to_http()?;
                let guard = self.balancer().begin_request(&service, instance);

                match time::timeout(settings.timeout, self.client().request(http_request)).await {
                    Ok(Ok(response)) if response.status().is_server_error() => {
                        let status = response.status().as_u16();
                        guard.finish(false);
                        Err(GatewayError::Upstream {
                            service: service.clone(),
                            status,
                            body: String::new(),
                        })
                    }
                    Ok(Ok(response)) => Ok((response, guard)),
                    Ok(Err(e)) => {
                        guard.finish(false);
                        Err(GatewayError::Connect {
                            service: service.clone(),
                            error: e.to_string(),
                        })
                    }
                    Err(_) => {
                        guard.finish(false);
                        Err(GatewayError::Timeout {
                            service: service.clone(),
                            timeout: settings.timeout,
                        })
                    }
                }
            })
            .await?;

        let (parts, body) = response.into_parts();
        let instance_id = guard.instance().id().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let breaker = self.circuits().get(&service);

        tracing::debug!(service = %service, instance = %instance_id, idle = ?idle, "Stream opened");
        tokio::spawn(pump(service, body, tx, guard, breaker, idle));

        Ok(StreamResponse {
            status: parts.status,
            headers: parts.headers,
            instance_id,
            body: ProxyStream { rx },
        })
    }
}

async fn pump(
    service: String,
    mut body: Incoming,
    tx: mpsc::Sender<Result<Bytes>>,
    guard: RequestGuard,
    breaker: std::sync::Arc<CircuitBreaker>,
    idle: Duration,
) {
    let started = Instant::now();
    let mut relayed = 0usize;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                tracing::debug!(service = %service, relayed, "Client disconnected, closing stream");
                guard.finish(true);
                return;
            }
            frame = time::timeout(idle, body.frame()) => match frame {
                Ok(Some(Ok(frame))) => {
                    let Ok(data) = frame.into_data() else { continue };
                    relayed += data.len();
                    if tx.send(Ok(data)).await.is_err() {
                        guard.finish(true);
                        return;
                    }
                }
                Ok(None) => {
                    tracing::debug!(service = %service, relayed, elapsed = ?started.elapsed(), "Stream completed");
                    guard.finish(true);
                    return;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(service = %service, relayed, error = %e, "Upstream stream failed");
                    guard.finish(false);
                    breaker.record_failure();
                    let _ = tx
                        .send(Err(GatewayError::Upstream {
                            service: service.clone(),
                            status: StatusCode::BAD_GATEWAY.as_u16(),
                            body: e.to_string(),
                        }))
                        .await;
                    return;
                }
                Err(_) => {
                    tracing::warn!(service = %service, relayed, idle = ?idle, "Stream idle, aborting");
                    guard.finish(false);
                    breaker.record_failure();
                    let _ = tx
                        .send(Err(GatewayError::StreamIdle {
                            service: service.clone(),
                            idle,
                        }))
                        .await;
                    return;
                }
            }
        }
    }
}
