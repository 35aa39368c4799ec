//! Service registry and instance selection.
//!
//! # Responsibilities
//! - Register and unregister logical services with their instances
//! - Select an eligible instance using the service's strategy
//! - Honour sticky-session bindings
//! - Track per-request outcomes (connections, latency, passive health)
//! - Own the per-service health prober task

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Algorithm, InstanceConfig, ServiceConfig};
use crate::health::HealthProber;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{
    instance::{Health, Instance, InstanceSnapshot},
    strategy_for,
    sticky::StickySessions,
    SelectionContext, SelectionStrategy,
};
use crate::net::HttpClient;
use crate::observability::events::EventBus;

/// One registered logical service.
pub struct ServiceEntry {
    config: ServiceConfig,
    instances: RwLock<Vec<Arc<Instance>>>,
    strategy: Box<dyn SelectionStrategy>,
    sticky: StickySessions,
    prober: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceEntry {
    fn new(config: ServiceConfig) -> Self {
        // Without active probing nothing would ever promote Unknown.
        let initial = if config.health_check.enabled {
            Health::Unknown
        } else {
            Health::Healthy
        };
        let instances = config
            .instances
            .iter()
            .cloned()
            .map(|c| Arc::new(Instance::new(c, initial)))
            .collect();

        Self {
            strategy: strategy_for(config.algorithm),
            sticky: StickySessions::new(config.sticky_session.clone()),
            instances: RwLock::new(instances),
            prober: Mutex::new(None),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Snapshot of the instance list, in registration order.
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.instances.read().clone()
    }

    pub fn instance(&self, id: &str) -> Option<Arc<Instance>> {
        self.instances.read().iter().find(|i| i.id() == id).cloned()
    }

    fn eligible(&self) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .iter()
            .filter(|i| i.is_eligible())
            .cloned()
            .collect()
    }

    fn stop_prober(&self) {
        if let Some(handle) = self.prober.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ServiceEntry {
    fn drop(&mut self) {
        self.stop_prober();
    }
}

/// Serializable view of a registered service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub algorithm: Algorithm,
    pub sticky_bindings: usize,
    pub instances: Vec<InstanceSnapshot>,
}

/// Process-wide registry of logical services.
pub struct LoadBalancer {
    services: DashMap<String, Arc<ServiceEntry>>,
    client: HttpClient,
    events: EventBus,
    shutdown: Shutdown,
}

impl LoadBalancer {
    pub fn new(client: HttpClient, events: EventBus, shutdown: Shutdown) -> Self {
        Self {
            services: DashMap::new(),
            client,
            events,
            shutdown,
        }
    }

    /// Register (or replace) a service and start its prober.
    ///
    /// Must be called from within a Tokio runtime when probing is enabled.
    pub fn register_service(&self, config: ServiceConfig) {
        let name = config.name.clone();
        let probing = config.health_check.enabled;
        let entry = Arc::new(ServiceEntry::new(config));

        if probing {
            let prober = HealthProber::new(&entry, self.client.clone(), self.events.clone());
            let handle = prober.spawn(self.shutdown.subscribe());
            *entry.prober.lock() = Some(handle);
        }

        if let Some(previous) = self.services.insert(name.clone(), entry) {
            previous.stop_prober();
            tracing::info!(service = %name, "Service re-registered");
        } else {
            tracing::info!(service = %name, "Service registered");
        }
    }

    /// Remove a service and cancel its prober. Returns false if unknown.
    pub fn unregister_service(&self, name: &str) -> bool {
        match self.services.remove(name) {
            Some((_, entry)) => {
                entry.stop_prober();
                tracing::info!(service = %name, "Service unregistered");
                true
            }
            None => {
                tracing::warn!(service = %name, "Unregister of unknown service ignored");
                false
            }
        }
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.services.get(name).map(|e| e.clone())
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Pick an instance for one request, or `None` when nothing is eligible.
    pub fn get_next_instance(&self, name: &str, ctx: &SelectionContext) -> Option<Arc<Instance>> {
        let Some(service) = self.service(name) else {
            tracing::warn!(service = %name, "Selection requested for unknown service");
            return None;
        };

        let eligible = service.eligible();
        if eligible.is_empty() {
            tracing::debug!(service = %name, total = service.instances.read().len(), "No eligible instances");
            return None;
        }

        let sticky_key = if service.sticky.enabled() {
            service.sticky.derive_key(ctx)
        } else {
            None
        };

        if let Some(key) = &sticky_key {
            if let Some(bound) = service.sticky.lookup(key) {
                if let Some(instance) = eligible.iter().find(|i| i.id() == bound) {
                    return Some(instance.clone());
                }
                tracing::debug!(service = %name, instance = %bound, "Sticky binding no longer eligible");
                service.sticky.invalidate(key);
            }
        }

        let selected = service.strategy.next_server(&eligible, ctx)?;
        if let Some(key) = sticky_key {
            service.sticky.bind(key, selected.id());
        }
        Some(selected)
    }

    pub fn record_request_start(&self, name: &str, instance_id: &str) {
        if let Some(instance) = self.find(name, instance_id) {
            instance.inc_connections();
        }
    }

    pub fn record_request_end(
        &self,
        name: &str,
        instance_id: &str,
        success: bool,
        response_time_ms: u64,
    ) {
        if let Some(instance) = self.find(name, instance_id) {
            instance.dec_connections();
            instance.record_outcome(success, response_time_ms, name, &self.events);
        }
    }

    /// Start tracking one request; the guard records its end.
    pub fn begin_request(&self, name: &str, instance: Arc<Instance>) -> RequestGuard {
        instance.inc_connections();
        RequestGuard {
            service: name.to_string(),
            instance,
            events: self.events.clone(),
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn mark_healthy(&self, name: &str, instance_id: &str) -> bool {
        self.set_health(name, instance_id, Health::Healthy)
    }

    pub fn mark_unhealthy(&self, name: &str, instance_id: &str) -> bool {
        self.set_health(name, instance_id, Health::Unhealthy)
    }

    fn set_health(&self, name: &str, instance_id: &str, health: Health) -> bool {
        match self.find(name, instance_id) {
            Some(instance) => {
                instance.update_health(health, name, &self.events);
                true
            }
            None => false,
        }
    }

    /// Add an instance to a registered service. Duplicate ids are rejected.
    pub fn add_instance(&self, name: &str, config: InstanceConfig) -> bool {
        let Some(service) = self.service(name) else {
            tracing::warn!(service = %name, "Add instance to unknown service ignored");
            return false;
        };
        let mut instances = service.instances.write();
        if instances.iter().any(|i| i.id() == config.id) {
            tracing::warn!(service = %name, instance = %config.id, "Duplicate instance ignored");
            return false;
        }
        let initial = if service.config.health_check.enabled {
            Health::Unknown
        } else {
            Health::Healthy
        };
        tracing::info!(service = %name, instance = %config.id, "Instance added");
        instances.push(Arc::new(Instance::new(config, initial)));
        true
    }

    pub fn remove_instance(&self, name: &str, instance_id: &str) -> bool {
        let Some(service) = self.service(name) else {
            return false;
        };
        let removed = {
            let mut instances = service.instances.write();
            let before = instances.len();
            instances.retain(|i| i.id() != instance_id);
            instances.len() != before
        };
        if removed {
            service.sticky.forget_instance(instance_id);
            tracing::info!(service = %name, instance = %instance_id, "Instance removed");
        }
        removed
    }

    pub fn service_stats(&self, name: &str) -> Option<ServiceSnapshot> {
        self.service(name).map(|service| snapshot(&service))
    }

    pub fn all_services(&self) -> Vec<ServiceSnapshot> {
        let mut all: Vec<_> = self.services.iter().map(|e| snapshot(e.value())).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Abort every prober. Registered services stay selectable.
    pub fn shutdown(&self) {
        for entry in self.services.iter() {
            entry.value().stop_prober();
        }
    }

    fn find(&self, name: &str, instance_id: &str) -> Option<Arc<Instance>> {
        self.service(name).and_then(|s| s.instance(instance_id))
    }
}

fn snapshot(service: &ServiceEntry) -> ServiceSnapshot {
    ServiceSnapshot {
        name: service.config.name.clone(),
        algorithm: service.config.algorithm,
        sticky_bindings: service.sticky.len(),
        instances: service.instances().iter().map(|i| i.snapshot()).collect(),
    }
}

/// A RAII guard that manages the active connection count of one request.
///
/// Dropping the guard without [`finish`](Self::finish) (a cancelled call or
/// a disconnected client) records a failure.
#[derive(Debug)]
pub struct RequestGuard {
    service: String,
    instance: Arc<Instance>,
    events: EventBus,
    started: Instant,
    finished: bool,
}

impl RequestGuard {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn finish(mut self, success: bool) {
        self.complete(success);
    }

    fn complete(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.instance.dec_connections();
        self.instance
            .record_outcome(success, elapsed, &self.service, &self.events);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.complete(false);
    }
}
