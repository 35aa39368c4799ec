//! Sticky session table.
//!
//! Bindings expire lazily: an expired entry is removed when it is looked up,
//! and `bind` sweeps out every expired entry at most once per prune interval
//! so keys that never come back do not pile up.
//! Whether the bound instance is still eligible is the caller's concern.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{StickyKeySource, StickySessionConfig};
use crate::load_balancer::SelectionContext;

#[derive(Debug, Clone)]
struct StickyEntry {
    instance_id: String,
    expires_at: Instant,
}

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct StickySessions {
    config: StickySessionConfig,
    entries: DashMap<String, StickyEntry>,
    last_prune: Mutex<Instant>,
}

impl StickySessions {
    pub fn new(config: StickySessionConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            last_prune: Mutex::new(Instant::now()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    /// Session id > user id > client IP, restricted by the configured source.
    pub fn derive_key(&self, ctx: &SelectionContext) -> Option<String> {
        match self.config.key_source {
            StickyKeySource::Auto => ctx
                .session_id
                .clone()
                .or_else(|| ctx.user_id.clone())
                .or_else(|| ctx.client_ip.clone()),
            StickyKeySource::Session => ctx.session_id.clone(),
            StickyKeySource::User => ctx.user_id.clone(),
            StickyKeySource::Ip => ctx.client_ip.clone(),
        }
    }

    /// Bound instance id for `key`, if the binding has not expired.
    pub fn lookup(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.instance_id.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn bind(&self, key: String, instance_id: &str) {
        let now = Instant::now();
        self.prune_if_due(now);
        self.entries.insert(
            key,
            StickyEntry {
                instance_id: instance_id.to_string(),
                expires_at: now + self.ttl(),
            },
        );
    }

    /// Remove every expired binding. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.entries.len())
    }

    fn prune_if_due(&self, now: Instant) {
        {
            let mut last = self.last_prune.lock();
            if now.saturating_duration_since(*last) < PRUNE_INTERVAL {
                return;
            }
            *last = now;
        }
        let removed = self.prune();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.len(), "Pruned expired sticky bindings");
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every binding to an instance that left the pool.
    pub fn forget_instance(&self, instance_id: &str) {
        self.entries.retain(|_, entry| entry.instance_id != instance_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
