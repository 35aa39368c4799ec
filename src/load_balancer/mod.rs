//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy asks for an instance of service S
//!     → registry.rs (service entry, eligible instances)
//!     → sticky.rs (existing binding for session/user/IP?)
//!     → Apply the service's strategy:
//!         - round_robin.rs (rotate / weighted rotate)
//!         - least_conn.rs (fewest connections / fastest average)
//!         - ip_hash.rs (client IP hash / uniform random)
//!     → instance.rs (connection + latency accounting)
//!     → Return instance or None ("no capacity")
//! ```
//!
//! # Design Decisions
//! - Strategy is fixed per service at registration
//! - Only Healthy and Degraded instances are eligible
//! - Strategies see the eligible list only; they never filter themselves
//! - Rotating counters are atomics so concurrent selections never double-assign

use std::sync::Arc;

use crate::config::Algorithm;

pub mod instance;
pub mod ip_hash;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod sticky;

pub use instance::{Health, Instance, InstanceSnapshot};
pub use registry::{LoadBalancer, RequestGuard, ServiceSnapshot};

/// Caller attributes available to selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionContext {
    pub client_ip: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// A selection algorithm over an already-filtered instance list.
pub trait SelectionStrategy: Send + Sync {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        ctx: &SelectionContext,
    ) -> Option<Arc<Instance>>;
}

pub fn strategy_for(algorithm: Algorithm) -> Box<dyn SelectionStrategy> {
    match algorithm {
        Algorithm::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        Algorithm::WeightedRoundRobin => Box::new(round_robin::WeightedRoundRobin::new()),
        Algorithm::LeastConnections => Box::new(least_conn::LeastConnections::new()),
        Algorithm::IpHash => Box::new(ip_hash::IpHash::new()),
        Algorithm::Random => Box::new(ip_hash::Random::new()),
        Algorithm::LeastResponseTime => Box::new(least_conn::LeastResponseTime::new()),
    }
}
