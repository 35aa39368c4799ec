//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Circuit breakers, health prober, load balancer:
//!     → events.rs (broadcast of state changes)
//!     → metrics.rs recorder task (log + gauges)
//!
//! Proxy and rate limiter:
//!     → metrics.rs (counters, histograms)
//!     → tracing macros (structured log events)
//! ```
//!
//! # Design Decisions
//! - Core components publish events, they never call observers directly
//! - Metrics go through the `metrics` facade; without an installed recorder they are no-ops

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventBus, GatewayEvent};
