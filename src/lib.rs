//! Traffic-resilience core for an API gateway.
//!
//! Four cooperating components guard every call to an upstream service:
//! rate limiter → circuit breaker → load balancer → service proxy.

pub mod admin;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use http::GatewayServer;
pub use lifecycle::{Gateway, Shutdown};
pub use load_balancer::LoadBalancer;
pub use proxy::{ProxyRequestConfig, ProxyResponse, ServiceProxy};
pub use resilience::CircuitBreakerRegistry;
pub use security::rate_limit::RateLimiter;
