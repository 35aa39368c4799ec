//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Per-service periodic timer
//!     → Probe each instance (GET {host}:{port}{path})
//!     → 2xx marks Healthy, anything else Unhealthy
//!
//! Passive health (load_balancer::instance):
//!     Request failure observed by the proxy
//!     → Consecutive failures move Healthy → Degraded
//!     → A success moves Degraded → Healthy
//! ```
//!
//! # Design Decisions
//! - Probing never blocks request serving; it runs on its own task
//! - Probers are cancelled on unregister (task abort) and on process shutdown
//! - Health is per-instance, not per-service

pub mod active;

pub use active::HealthProber;
