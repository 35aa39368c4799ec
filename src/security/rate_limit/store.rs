//! Storage seam for rate-limit counters.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Counter for one key in one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u64,
    /// Wall-clock end of the window, in Unix milliseconds.
    pub reset_time_ms: u64,
}

impl RateLimitEntry {
    /// Only authoritative while `now < reset_time_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_time_ms
    }

    /// First request of a fresh window.
    pub fn fresh(now_ms: u64, window: Duration) -> Self {
        Self {
            count: 1,
            reset_time_ms: now_ms + window.as_millis() as u64,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Backend holding rate-limit counters.
///
/// Implementations must make `increment` atomic per key: two concurrent
/// increments on the same key always observe distinct counts.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError>;

    async fn set(&self, key: &str, entry: RateLimitEntry) -> Result<(), StoreError>;

    /// Count one request against `key`, starting a new window when the
    /// current one is missing or expired. Returns the entry after the update.
    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitEntry, StoreError>;
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
