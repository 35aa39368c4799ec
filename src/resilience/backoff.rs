//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the random jitter added to every delay.
pub const MAX_JITTER_MS: u64 = 100;

/// `base × 2^(attempt-1) + rand(0..100ms)`; attempt 0 waits nothing.
pub fn calculate_backoff(attempt: u32, base: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let exponential = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential);
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);

    Duration::from_millis(delay_ms.saturating_add(jitter))
}
