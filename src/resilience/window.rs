//! Bucketed sliding window of call outcomes.
//!
//! The window covers `bucket_count × bucket_duration` of trailing traffic.
//! Buckets older than that are evicted lazily on write; reads ignore them
//! without evicting so that inspecting the window never mutates it.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    start: Instant,
    successes: u64,
    failures: u64,
    slow: u64,
}

impl Bucket {
    fn new(start: Instant) -> Self {
        Self {
            start,
            successes: 0,
            failures: 0,
            slow: 0,
        }
    }
}

/// Aggregated counts over the live part of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub successes: u64,
    pub failures: u64,
    /// Slow calls are a subset of successes.
    pub slow: u64,
}

impl WindowCounts {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure percentage in 0..=100.
    pub fn failure_rate(&self) -> f64 {
        percentage(self.failures, self.total())
    }

    /// Slow-call percentage in 0..=100.
    pub fn slow_call_rate(&self) -> f64 {
        percentage(self.slow, self.total())
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[derive(Debug)]
pub struct SlidingWindow {
    buckets: VecDeque<Bucket>,
    bucket_count: usize,
    bucket_duration: Duration,
}

impl SlidingWindow {
    pub fn new(bucket_count: usize, bucket_duration: Duration) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: VecDeque::with_capacity(bucket_count),
            bucket_count,
            bucket_duration,
        }
    }

    fn span(&self) -> Duration {
        self.bucket_duration * self.bucket_count as u32
    }

    fn is_live(&self, bucket: &Bucket, now: Instant) -> bool {
        now.saturating_duration_since(bucket.start) < self.span()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if self.is_live(front, now) {
                break;
            }
            self.buckets.pop_front();
        }
    }

    fn current(&mut self, now: Instant) -> &mut Bucket {
        self.evict(now);
        let needs_new = match self.buckets.back() {
            Some(last) => now.saturating_duration_since(last.start) >= self.bucket_duration,
            None => true,
        };
        if needs_new {
            if self.buckets.len() == self.bucket_count {
                self.buckets.pop_front();
            }
            self.buckets.push_back(Bucket::new(now));
        }
        // A bucket was pushed above if the deque was empty.
        let idx = self.buckets.len() - 1;
        &mut self.buckets[idx]
    }

    pub fn record_success(&mut self, now: Instant, slow: bool) {
        let bucket = self.current(now);
        bucket.successes += 1;
        if slow {
            bucket.slow += 1;
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.current(now).failures += 1;
    }

    /// Sum of every bucket still inside the window.
    pub fn counts(&self, now: Instant) -> WindowCounts {
        self.buckets
            .iter()
            .filter(|b| self.is_live(b, now))
            .fold(WindowCounts::default(), |mut acc, b| {
                acc.successes += b.successes;
                acc.failures += b.failures;
                acc.slow += b.slow;
                acc
            })
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
