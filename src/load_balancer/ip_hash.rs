//! IP-hash and random strategies.

use std::sync::Arc;

use crate::load_balancer::{instance::Instance, SelectionContext, SelectionStrategy};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a; stable across processes and restarts.
fn fnv1a(input: &str) -> u64 {
    input.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Routes a client IP to the same instance while the eligible set is stable.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for IpHash {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        let key = ctx.client_ip.as_deref().unwrap_or_default();
        let index = (fnv1a(key) % instances.len() as u64) as usize;
        Some(instances[index].clone())
    }
}

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for Random {
    fn next_server(
        &self,
        instances: &[Arc<Instance>],
        _ctx: &SelectionContext,
    ) -> Option<Arc<Instance>> {
        if instances.is_empty() {
            return None;
        }
        Some(instances[fastrand::usize(..instances.len())].clone())
    }
}
