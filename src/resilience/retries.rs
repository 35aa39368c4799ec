//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether an attempt outcome is retryable
//! - Bound the number of attempts
//! - Produce the delay before the next attempt
//!
//! # Design Decisions
//! - Transport failures and timeouts are always retryable
//! - Only the configured status set is retried; other responses are final
//! - `retries` counts additional attempts, so total attempts = retries + 1

use std::time::Duration;

use crate::config::{ProxyDefaults, ServiceProxyConfig};
use crate::resilience::backoff::calculate_backoff;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ProxyDefaults::default(), &ServiceProxyConfig::default())
    }
}

impl RetryPolicy {
    /// Service overrides layered over gateway defaults.
    pub fn from_config(defaults: &ProxyDefaults, service: &ServiceProxyConfig) -> Self {
        Self {
            retries: service.retries.unwrap_or(defaults.retries),
            base_delay: Duration::from_millis(
                service.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            ),
            retryable_statuses: service
                .retryable_status_codes
                .clone()
                .unwrap_or_else(|| defaults.retryable_status_codes.clone()),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay)
    }
}
