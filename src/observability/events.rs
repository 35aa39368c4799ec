//! State-change event fan-out.
//!
//! Circuit transitions and instance health changes are published here.
//! Any number of consumers may subscribe; publishing never blocks and
//! succeeds even when nobody is listening.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::load_balancer::instance::Health;
use crate::resilience::circuit_breaker::{CircuitState, CircuitStats};

const EVENT_CAPACITY: usize = 1024;

/// An observable state change in the resilience core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    CircuitStateChanged {
        service: String,
        previous: CircuitState,
        current: CircuitState,
        stats: CircuitStats,
    },
    InstanceHealthChanged {
        service: String,
        instance_id: String,
        previous: Health,
        current: Health,
    },
}

/// Broadcast channel shared by every publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: GatewayEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
