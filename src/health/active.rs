//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every instance of one service
//! - Update instance health state based on results
//!
//! # Design Decisions
//! - One prober task per registered service, started on registration
//! - The first tick fires immediately, so a fresh service is probed at once
//! - Probes of one tick run concurrently; each carries its own deadline
//! - The prober holds only a weak reference to its service and exits when it is gone

use std::sync::{Arc, Weak};

use axum::http::{header, Method, Request};
use bytes::Bytes;
use futures_util::future::join_all;
use http_body_util::Full;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::load_balancer::instance::{Health, Instance};
use crate::load_balancer::registry::ServiceEntry;
use crate::net::HttpClient;
use crate::observability::events::EventBus;

const USER_AGENT: &str = "traffic-gateway-health-check";

pub struct HealthProber {
    service: Weak<ServiceEntry>,
    name: String,
    config: HealthCheckConfig,
    client: HttpClient,
    events: EventBus,
}

impl HealthProber {
    pub fn new(service: &Arc<ServiceEntry>, client: HttpClient, events: EventBus) -> Self {
        Self {
            service: Arc::downgrade(service),
            name: service.name().to_string(),
            config: service.config().health_check.clone(),
            client,
            events,
        }
    }

    /// Run the probe loop on its own task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            service = %self.name,
            interval_ms = self.config.interval_ms,
            path = %self.config.path,
            "Health prober starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(service) = self.service.upgrade() else {
                        break;
                    };
                    let instances = service.instances();
                    drop(service);
                    self.check_all(&instances).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(service = %self.name, "Health prober received shutdown signal");
                    break;
                }
            }
        }
    }

    pub async fn check_all(&self, instances: &[Arc<Instance>]) {
        join_all(instances.iter().map(|instance| self.probe(instance))).await;
    }

    /// Probe one instance and record the result. Returns true when healthy.
    pub async fn probe(&self, instance: &Instance) -> bool {
        let uri = format!("{}{}", instance.base_url(), self.config.path);
        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Full::new(Bytes::new()))
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(service = %self.name, uri = %uri, error = %e, "Failed to build health check request");
                return false;
            }
        };

        // Timing out drops the request future, which cancels the connection.
        let healthy = match time::timeout(self.config.timeout(), self.client.request(request)).await
        {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(service = %self.name, instance = %instance.id(), status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %self.name, instance = %instance.id(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(service = %self.name, instance = %instance.id(), "Health check failed: timeout");
                false
            }
        };

        instance.mark_health_checked();
        let new = if healthy {
            Health::Healthy
        } else {
            Health::Unhealthy
        };
        instance.update_health(new, &self.name, &self.events);
        healthy
    }
}
