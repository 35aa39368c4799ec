//! In-process counter store with a periodic sweep of expired windows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::store::{now_ms, RateLimitEntry, RateLimitStore, StoreError};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep on a fixed interval until shutdown. The interval is floored at
    /// one millisecond.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = self.len(), "Swept expired rate limit entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Rate limit sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        let now = now_ms();
        Ok(self
            .entries
            .get(key)
            .map(|e| *e)
            .filter(|e| !e.is_expired(now)))
    }

    async fn set(&self, key: &str, entry: RateLimitEntry) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<RateLimitEntry, StoreError> {
        let now = now_ms();
        // The shard lock is held for the whole read-modify-write.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                count: 0,
                reset_time_ms: 0,
            });
        if entry.is_expired(now) {
            *entry = RateLimitEntry::fresh(now, window);
        } else {
            entry.count += 1;
        }
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_within_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let first = store.increment("ip:1.2.3.4", window).await.unwrap();
        let second = store.increment("ip:1.2.3.4", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert_eq!(first.reset_time_ms, second.reset_time_ms);
    }

    #[tokio::test]
    async fn test_expired_entry_is_replaced() {
        let store = MemoryStore::new();
        store
            .set(
                "user:42",
                RateLimitEntry {
                    count: 99,
                    reset_time_ms: now_ms().saturating_sub(1),
                },
            )
            .await
            .unwrap();
        assert!(store.get("user:42").await.unwrap().is_none());

        let entry = store
            .increment("user:42", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_distinct() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment("ip:burst", Duration::from_secs(60))
                    .await
                    .unwrap()
                    .count
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let store = MemoryStore::new();
        let past = now_ms().saturating_sub(10);
        store
            .set("old", RateLimitEntry { count: 3, reset_time_ms: past })
            .await
            .unwrap();
        store
            .increment("live", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_survives_zero_interval() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                "old",
                RateLimitEntry {
                    count: 1,
                    reset_time_ms: now_ms().saturating_sub(10),
                },
            )
            .await
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = store.clone().spawn_sweeper(Duration::ZERO, rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
