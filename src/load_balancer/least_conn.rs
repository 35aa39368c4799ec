//! Least-connections and least-response-time strategies.

use std::sync::Arc;

use crate::load_balancer::{
    instance::Instance, round_robin::RoundRobin, SelectionContext, SelectionStrategy,
};

/// Least connections selector.
/// Selects the instance with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        _ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        // In case of tie, the first one is selected (stability)
        instances
            .iter()
            .min_by_key(|i| i.active_connections())
            .cloned()
    }
}

/// Least response time selector.
///
/// Only instances with a recorded latency sample compete; until any
/// instance has one, selection falls back to round robin.
#[derive(Debug, Default)]
pub struct LeastResponseTime {
    fallback: RoundRobin,
}

impl LeastResponseTime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for LeastResponseTime {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        let fastest = instances
            .iter()
            .filter_map(|i| i.avg_response_time().map(|avg| (avg, i)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, i)| i.clone());

        fastest.or_else(|| self.fallback.next_server(instances, ctx))
    }
}
