//! Round-robin and weighted round-robin strategies.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{instance::Instance, SelectionContext, SelectionStrategy};

/// Round-robin selector.
/// Stores an internal counter to rotate through instances.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        _ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % instances.len();
        Some(instances[index].clone())
    }
}

/// Weighted round-robin selector.
///
/// A rotating counter modulo the total weight is mapped onto the
/// cumulative weight line, so an instance of weight 3 is picked three
/// times per cycle.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for WeightedRoundRobin {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        _ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        let total: u64 = instances.iter().map(|i| i.config.weight as u64).sum();
        if total == 0 {
            return None;
        }

        let point = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        let mut cumulative = 0u64;
        for instance in instances {
            cumulative += instance.config.weight as u64;
            if point < cumulative {
                return Some(instance.clone());
            }
        }
        None
    }
}
