//! Per-service circuit breaker table and guarded execution.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{GatewayError, Result};
use crate::observability::events::EventBus;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};

/// Owns one breaker per logical service name, created on first reference.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    overrides: DashMap<String, CircuitBreakerConfig>,
    defaults: CircuitBreakerConfig,
    events: EventBus,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            breakers: DashMap::new(),
            overrides: DashMap::new(),
            defaults,
            events,
        }
    }

    /// Set thresholds for one service. An existing breaker is replaced.
    pub fn configure(&self, service: &str, config: CircuitBreakerConfig) {
        self.overrides.insert(service.to_string(), config.clone());
        if self.breakers.contains_key(service) {
            let breaker = CircuitBreaker::new(service, config, self.events.clone());
            self.breakers.insert(service.to_string(), Arc::new(breaker));
        }
    }

    /// Drop a per-service override so `service` falls back to the defaults.
    /// An existing breaker is replaced only if an override was in effect.
    pub fn clear_override(&self, service: &str) {
        if self.overrides.remove(service).is_none() {
            return;
        }
        if self.breakers.contains_key(service) {
            let breaker = CircuitBreaker::new(service, self.defaults.clone(), self.events.clone());
            self.breakers.insert(service.to_string(), Arc::new(breaker));
        }
        tracing::info!(service = %service, "Circuit override cleared");
    }

    /// Breaker for `service`, created lazily.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(service)
                    .map(|c| c.clone())
                    .unwrap_or_else(|| self.defaults.clone());
                tracing::debug!(service = %service, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(service, config, self.events.clone()))
            })
            .clone()
    }

    /// State of an existing breaker; unknown services report Closed.
    pub fn get_state(&self, service: &str) -> CircuitState {
        self.breakers
            .get(service)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn get_stats(&self, service: &str) -> Option<CircuitStats> {
        self.breakers.get(service).map(|b| b.stats())
    }

    pub fn all_stats(&self) -> Vec<(String, CircuitStats)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Run `f` under the breaker for `service`.
    ///
    /// Fails fast with `CircuitOpen` without invoking `f` when the breaker
    /// rejects. Every `Err` from `f` counts as a failure, every `Ok` as a
    /// success timed from the start of the call. If this future is dropped
    /// mid-call nothing is recorded and a half-open trial slot is returned.
    pub async fn execute<T, F, Fut>(&self, service: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(permit) = self.get(service).try_acquire() else {
            tracing::debug!(service = %service, "Circuit open, rejecting call");
            return Err(GatewayError::CircuitOpen {
                service: service.to_string(),
            });
        };

        let started = Instant::now();
        match f().await {
            Ok(value) => {
                permit.success(started.elapsed());
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(e)
            }
        }
    }

    /// Like [`execute`](Self::execute), but availability failures (circuit
    /// open, no instances) are handed to `fallback`, which may substitute a value.
    pub async fn execute_with_fallback<T, F, Fut, FB>(
        &self,
        service: &str,
        f: F,
        fallback: FB,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce(GatewayError) -> Result<T>,
    {
        match self.execute(service, f).await {
            Err(e) if e.is_availability() => fallback(e),
            other => other,
        }
    }
}
