//! Instance abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream instance of a logical service
//! - Track active connections (for Least Connections)
//! - Track a rolling latency sample (for Least Response Time)
//! - Track health state and request outcomes

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::InstanceConfig;
use crate::observability::events::{EventBus, GatewayEvent};

/// Latencies kept for the rolling average.
pub const LATENCY_SAMPLES: usize = 100;

/// Consecutive request failures that move a healthy instance to Degraded.
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
    Degraded = 3,
}

impl From<u8> for Health {
    fn from(val: u8) -> Self {
        match val {
            1 => Health::Healthy,
            2 => Health::Unhealthy,
            3 => Health::Degraded,
            _ => Health::Unknown,
        }
    }
}

impl Health {
    /// Only Healthy and Degraded instances receive traffic.
    pub fn is_eligible(self) -> bool {
        matches!(self, Health::Healthy | Health::Degraded)
    }
}

/// Serializable view of an instance's runtime statistics.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    #[serde(flatten)]
    pub config: InstanceConfig,
    pub health: Health,
    pub active_connections: usize,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub last_health_check: Option<SystemTime>,
    pub last_successful_request: Option<SystemTime>,
}

/// A single upstream instance with its live counters.
#[derive(Debug)]
pub struct Instance {
    pub config: InstanceConfig,
    health: AtomicU8,
    active_connections: AtomicUsize,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    consecutive_failures: AtomicU32,
    latencies: Mutex<VecDeque<u64>>,
    last_health_check: Mutex<Option<SystemTime>>,
    last_successful_request: Mutex<Option<SystemTime>>,
}

impl Instance {
    pub fn new(config: InstanceConfig, initial: Health) -> Self {
        Self {
            config,
            health: AtomicU8::new(initial as u8),
            active_connections: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_SAMPLES)),
            last_health_check: Mutex::new(None),
            last_successful_request: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    pub fn health(&self) -> Health {
        Health::from(self.health.load(Ordering::Acquire))
    }

    pub fn is_eligible(&self) -> bool {
        self.health().is_eligible()
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement, flooring at zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            });
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Mean of the retained latency sample, `None` before the first request.
    pub fn avg_response_time(&self) -> Option<f64> {
        let samples = self.latencies.lock();
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<u64>() as f64 / samples.len() as f64)
    }

    /// Set health, publishing an event when it actually changes.
    pub fn update_health(&self, new: Health, service: &str, events: &EventBus) -> bool {
        let previous = Health::from(self.health.swap(new as u8, Ordering::AcqRel));
        if previous == new {
            return false;
        }
        if new == Health::Healthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
        events.publish(GatewayEvent::InstanceHealthChanged {
            service: service.to_string(),
            instance_id: self.config.id.clone(),
            previous,
            current: new,
        });
        true
    }

    pub fn mark_health_checked(&self) {
        *self.last_health_check.lock() = Some(SystemTime::now());
    }

    /// Account one finished request and apply passive health rules.
    pub fn record_outcome(
        &self,
        success: bool,
        response_time_ms: u64,
        service: &str,
        events: &EventBus,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        {
            let mut samples = self.latencies.lock();
            if samples.len() == LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(response_time_ms);
        }

        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            *self.last_successful_request.lock() = Some(SystemTime::now());
            if self.health() == Health::Degraded {
                self.update_health(Health::Healthy, service, events);
            }
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures >= DEGRADED_AFTER_FAILURES
                && self
                    .health
                    .compare_exchange(
                        Health::Healthy as u8,
                        Health::Degraded as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                tracing::warn!(service = %service, instance = %self.config.id, failures, "Instance degraded");
                events.publish(GatewayEvent::InstanceHealthChanged {
                    service: service.to_string(),
                    instance_id: self.config.id.clone(),
                    previous: Health::Healthy,
                    current: Health::Degraded,
                });
            }
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            config: self.config.clone(),
            health: self.health(),
            active_connections: self.active_connections(),
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests(),
            avg_response_time_ms: self.avg_response_time(),
            consecutive_failures: self.consecutive_failures(),
            last_health_check: *self.last_health_check.lock(),
            last_successful_request: *self.last_successful_request.lock(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::new(InstanceConfig::new("a", "127.0.0.1", 8080), Health::Healthy)
    }

    #[test]
    fn test_connections_floor_at_zero() {
        let i = instance();
        i.dec_connections();
        assert_eq!(i.active_connections(), 0);
        i.inc_connections();
        i.inc_connections();
        i.dec_connections();
        assert_eq!(i.active_connections(), 1);
    }

    #[test]
    fn test_latency_sample_is_bounded() {
        let i = instance();
        let events = EventBus::new();
        assert!(i.avg_response_time().is_none());
        for _ in 0..LATENCY_SAMPLES {
            i.record_outcome(true, 1000, "svc", &events);
        }
        for _ in 0..LATENCY_SAMPLES {
            i.record_outcome(true, 10, "svc", &events);
        }
        assert_eq!(i.avg_response_time(), Some(10.0));
        assert_eq!(i.total_requests(), 2 * LATENCY_SAMPLES as u64);
    }

    #[test]
    fn test_passive_degrade_and_recover() {
        let i = instance();
        let events = EventBus::new();
        let mut rx = events.subscribe();

        i.record_outcome(false, 5, "svc", &events);
        i.record_outcome(false, 5, "svc", &events);
        assert_eq!(i.health(), Health::Healthy);
        i.record_outcome(false, 5, "svc", &events);
        assert_eq!(i.health(), Health::Degraded);
        assert!(i.is_eligible());
        assert_eq!(i.failed_requests(), 3);

        i.record_outcome(true, 5, "svc", &events);
        assert_eq!(i.health(), Health::Healthy);
        assert_eq!(i.consecutive_failures(), 0);

        let mut seen = Vec::new();
        while let Ok(GatewayEvent::InstanceHealthChanged { current, .. }) = rx.try_recv() {
            seen.push(current);
        }
        assert_eq!(seen, vec![Health::Degraded, Health::Healthy]);
    }

    #[test]
    fn test_failures_do_not_revive_unhealthy() {
        let i = instance();
        let events = EventBus::new();
        i.update_health(Health::Unhealthy, "svc", &events);
        for _ in 0..5 {
            i.record_outcome(false, 5, "svc", &events);
        }
        assert_eq!(i.health(), Health::Unhealthy);
    }
}
