use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Jittered exponential delays, one per granted retry
pub fn backoff(base: Duration, retries: usize) -> impl Iterator<Item = Duration> {
    let base_ms = (base.as_millis() as u64).max(1);

    ExponentialBackoff::from_millis(base_ms)
        .max_delay(MAX_RETRY_DELAY)
        .map(jitter)
        .take(retries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_length_matches_budget() {
        assert_eq!(backoff(Duration::from_millis(1000), 1).count(), 1);
        assert_eq!(backoff(Duration::from_millis(1000), 0).count(), 0);
    }

    #[test]
    fn test_backoff_is_capped() {
        for delay in backoff(Duration::from_millis(1000), 4) {
            assert!(delay <= MAX_RETRY_DELAY);
        }
    }
}
