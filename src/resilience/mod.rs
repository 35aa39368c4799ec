//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Proxied call for service S:
//!     → registry.rs (breaker for S, created lazily)
//!     → circuit_breaker.rs (can_execute? else fail fast)
//!     → [upstream attempts]
//!         → retries.rs (retryable? attempts left?)
//!         → backoff.rs (exponential delay + jitter)
//!     → circuit_breaker.rs (record success with duration / failure)
//!         → window.rs (bucketed outcome counts)
//! ```
//!
//! # Design Decisions
//! - Breakers are per logical service, not per instance
//! - Open → Half-Open is evaluated lazily; no timers
//! - Backoff sleeps are the only suspension points added by this layer

pub mod backoff;
pub mod circuit_breaker;
pub mod registry;
pub mod retries;
pub mod window;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState, CircuitStats};
pub use registry::CircuitBreakerRegistry;
pub use retries::RetryPolicy;
