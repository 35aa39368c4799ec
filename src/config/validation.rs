//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, percentages within 0..=100)
//! - Detect duplicate service and instance names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{Algorithm, CircuitBreakerConfig, GatewayConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid bind address {0}")]
    BindAddress(String),

    #[error("duplicate service {0}")]
    DuplicateService(String),

    #[error("service {0} has no instances")]
    NoInstances(String),

    #[error("service {service} has duplicate instance {instance}")]
    DuplicateInstance { service: String, instance: String },

    #[error("service {service} instance {instance} has zero weight")]
    ZeroWeight { service: String, instance: String },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field} must be within 0..=100, got {value}")]
    Percentage { field: String, value: f64 },
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    validate_circuit("circuit_breaker", &config.circuit_breaker, &mut errors);

    if config.proxy.timeout_ms == 0 {
        errors.push(zero("proxy.timeout_ms"));
    }
    if config.rate_limit.window_ms == 0 {
        errors.push(zero("rate_limit.window_ms"));
    }
    if config.rate_limit.sweep_interval_ms == 0 {
        errors.push(zero("rate_limit.sweep_interval_ms"));
    }
    for route in &config.rate_limit.routes {
        if route.window_ms == Some(0) {
            errors.push(zero(&format!(
                "rate_limit.routes[{}].window_ms",
                route.path_prefix
            )));
        }
    }

    let mut names = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.instances.is_empty() {
            errors.push(ValidationError::NoInstances(service.name.clone()));
        }

        let mut ids = HashSet::new();
        for instance in &service.instances {
            if !ids.insert(instance.id.as_str()) {
                errors.push(ValidationError::DuplicateInstance {
                    service: service.name.clone(),
                    instance: instance.id.clone(),
                });
            }
            if service.algorithm == Algorithm::WeightedRoundRobin && instance.weight == 0 {
                errors.push(ValidationError::ZeroWeight {
                    service: service.name.clone(),
                    instance: instance.id.clone(),
                });
            }
        }

        if service.health_check.enabled {
            if service.health_check.interval_ms == 0 {
                errors.push(zero(&format!("{}.health_check.interval_ms", service.name)));
            }
            if service.health_check.timeout_ms == 0 {
                errors.push(zero(&format!("{}.health_check.timeout_ms", service.name)));
            }
        }
        if service.proxy.timeout_ms == Some(0) {
            errors.push(zero(&format!("{}.proxy.timeout_ms", service.name)));
        }
        if let Some(cb) = &service.circuit_breaker {
            validate_circuit(&format!("{}.circuit_breaker", service.name), cb, &mut errors);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_circuit(prefix: &str, cb: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    for (field, value) in [
        ("failure_rate_threshold", cb.failure_rate_threshold),
        ("slow_call_rate_threshold", cb.slow_call_rate_threshold),
    ] {
        if !(0.0..=100.0).contains(&value) {
            errors.push(ValidationError::Percentage {
                field: format!("{prefix}.{field}"),
                value,
            });
        }
    }
    if cb.window_buckets == 0 {
        errors.push(zero(&format!("{prefix}.window_buckets")));
    }
    if cb.bucket_duration_ms == 0 {
        errors.push(zero(&format!("{prefix}.bucket_duration_ms")));
    }
}

fn zero(field: &str) -> ValidationError {
    ValidationError::Zero {
        field: field.to_string(),
    }
}
