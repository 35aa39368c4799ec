//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied calls by service, outcome
//! - `gateway_upstream_duration_seconds` (histogram): upstream latency
//! - `gateway_retries_total` (counter): retry attempts by service
//! - `gateway_rate_limited_total` (counter): rejected admissions by tier
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `gateway_instance_health` (gauge): 1=eligible, 0=not eligible

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::observability::events::{EventBus, GatewayEvent};
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, outcome: &'static str, elapsed: Duration) {
    counter!("gateway_requests_total", "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
    histogram!("gateway_upstream_duration_seconds", "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(service: &str) {
    counter!("gateway_retries_total", "service" => service.to_string()).increment(1);
}

pub fn record_rate_limited(tier: &'static str) {
    counter!("gateway_rate_limited_total", "tier" => tier).increment(1);
}

fn circuit_gauge(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

/// Log every gateway event and mirror it into gauges.
pub fn spawn_event_recorder(
    events: &EventBus,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => record_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event recorder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }
    })
}

fn record_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::CircuitStateChanged {
            service,
            previous,
            current,
            stats,
        } => {
            tracing::warn!(
                service = %service,
                previous = ?previous,
                current = ?current,
                failure_rate = stats.failure_rate,
                total_requests = stats.total_requests,
                "Circuit state changed"
            );
            gauge!("gateway_circuit_state", "service" => service.clone()).set(circuit_gauge(*current));
        }
        GatewayEvent::InstanceHealthChanged {
            service,
            instance_id,
            previous,
            current,
        } => {
            tracing::info!(
                service = %service,
                instance = %instance_id,
                previous = ?previous,
                current = ?current,
                "Instance health changed"
            );
            let value = if current.is_eligible() { 1.0 } else { 0.0 };
            gauge!(
                "gateway_instance_health",
                "service" => service.clone(),
                "instance" => instance_id.clone()
            )
            .set(value);
        }
    }
}
