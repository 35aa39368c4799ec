//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::MAX_JITTER_MS;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Logical upstream services and their instances.
    pub services: Vec<ServiceConfig>,

    /// Default circuit breaker thresholds (per-service overrides live on the service).
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default proxy call settings.
    pub proxy: ProxyDefaults,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API configuration.
    pub admin: AdminConfig,
}

impl GatewayConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Overall request timeout enforced at the edge, in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            // Above the worst-case default proxy call (4 × 30s plus backoff).
            request_timeout_secs: 150,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Instance selection algorithm, fixed per service at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    IpHash,
    Random,
    LeastResponseTime,
}

/// A single physical instance of a logical service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstanceConfig {
    /// Unique instance identifier within the service.
    pub id: String,

    /// Hostname or IP address.
    pub host: String,

    /// TCP port.
    pub port: u16,

    /// Weight for weighted round robin (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Optional availability zone.
    #[serde(default)]
    pub zone: Option<String>,

    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_weight() -> u32 {
    1
}

impl InstanceConfig {
    /// Convenience constructor with weight 1 and no zone or tags.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: 1,
            zone: None,
            tags: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// `http://host:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Active health check configuration for one service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Path to probe.
    pub path: String,

    /// Probe timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            path: "/health".to_string(),
            timeout_ms: 5_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the sticky-session key is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StickyKeySource {
    /// Session id, then user id, then client IP.
    #[default]
    Auto,
    Session,
    User,
    Ip,
}

/// Session affinity configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StickySessionConfig {
    pub enabled: bool,

    /// Binding lifetime in seconds.
    pub ttl_seconds: u64,

    pub key_source: StickyKeySource,
}

impl Default for StickySessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: 3600,
            key_source: StickyKeySource::Auto,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Time spent open before a half-open trial, in milliseconds.
    pub timeout_ms: u64,

    /// Minimum requests in the window before any trip rule applies.
    pub volume_threshold: u64,

    /// Failure percentage (0-100) that trips the circuit.
    pub failure_rate_threshold: f64,

    /// Successes slower than this are counted as slow, in milliseconds.
    pub slow_call_threshold_ms: u64,

    /// Slow-call percentage (0-100) that trips the circuit.
    pub slow_call_rate_threshold: f64,

    /// Trial calls admitted while half-open.
    pub half_open_requests: u32,

    /// Number of buckets in the sliding window.
    pub window_buckets: usize,

    /// Duration of each bucket, in milliseconds.
    pub bucket_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 30_000,
            volume_threshold: 10,
            failure_rate_threshold: 50.0,
            slow_call_threshold_ms: 5_000,
            slow_call_rate_threshold: 80.0,
            half_open_requests: 3,
            window_buckets: 10,
            bucket_duration_ms: 1_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }

    pub fn bucket_duration(&self) -> Duration {
        Duration::from_millis(self.bucket_duration_ms)
    }
}

/// Proxy defaults applied to every service unless overridden.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProxyDefaults {
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,

    /// Retries after the first attempt.
    pub retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Upstream statuses that trigger a retry.
    pub retryable_status_codes: Vec<u16>,
}

impl Default for ProxyDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 3,
            retry_delay_ms: 1_000,
            retryable_status_codes: vec![502, 503, 504],
        }
    }
}

impl ProxyDefaults {
    /// Longest a retried call can take: every attempt hits its deadline and
    /// every backoff draws the maximum jitter.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = u64::from(self.retries) + 1;
        let backoff_ms: u64 = (1..=self.retries)
            .map(|attempt| {
                self.retry_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1))
                    .saturating_add(MAX_JITTER_MS)
            })
            .fold(0, u64::saturating_add);
        Duration::from_millis(
            self.timeout_ms
                .saturating_mul(attempts)
                .saturating_add(backoff_ms),
        )
    }
}

/// Per-service proxy overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceProxyConfig {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub retryable_status_codes: Option<Vec<u16>>,

    /// Prefix removed from the incoming path before forwarding.
    pub strip_prefix: Option<String>,

    /// Prefix prepended to the (stripped) path before forwarding.
    pub add_prefix: Option<String>,

    /// Forward the caller's Host header instead of the instance address.
    pub preserve_host: bool,
}

/// A logical upstream service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Logical service name (e.g., "farm-service").
    pub name: String,

    /// Physical instances, in selection order.
    pub instances: Vec<InstanceConfig>,

    #[serde(default)]
    pub algorithm: Algorithm,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub sticky_session: StickySessionConfig,

    /// Circuit breaker override for this service.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    #[serde(default)]
    pub proxy: ServiceProxyConfig,
}

impl ServiceConfig {
    /// A round-robin service with health checking disabled.
    pub fn new(name: impl Into<String>, instances: Vec<InstanceConfig>) -> Self {
        Self {
            name: name.into(),
            instances,
            algorithm: Algorithm::RoundRobin,
            health_check: HealthCheckConfig::disabled(),
            sticky_session: StickySessionConfig::default(),
            circuit_breaker: None,
            proxy: ServiceProxyConfig::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// Which store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStoreKind {
    #[default]
    Memory,
    Redis,
}

/// Explicit limit attached to a route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteRateLimit {
    /// Path prefix this override applies to.
    pub path_prefix: String,

    /// Maximum requests per window.
    pub limit: u64,

    /// Window override in milliseconds.
    #[serde(default)]
    pub window_ms: Option<u64>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Fixed window length in milliseconds.
    pub window_ms: u64,

    /// Limit for authenticated callers.
    pub default_limit: u64,

    /// Limit for anonymous callers.
    pub anonymous_limit: u64,

    /// Limit for tenant-scoped callers.
    pub tenant_limit: u64,

    /// Sweep interval for the in-memory store, in milliseconds.
    pub sweep_interval_ms: u64,

    pub store: RateLimitStoreKind,

    /// Connection URL for the redis store.
    pub redis_url: String,

    /// Per-route overrides, longest prefix wins.
    pub routes: Vec<RouteRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            default_limit: 100,
            anonymous_limit: 20,
            tenant_limit: 1_000,
            sweep_interval_ms: 60_000,
            store: RateLimitStoreKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            routes: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
