//! Minimum-interval pacing shared by every caller of a quota-limited upstream.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Spaces calls at least `min_interval` apart, process-wide.
///
/// Callers queue on the internal lock, so concurrent requests are serialised
/// and each waits its turn rather than failing.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Interval for a quota of `calls_per_minute`, scaled down by
    /// `safety_margin` (0, 1] to stay below the advertised limit.
    pub fn from_quota(calls_per_minute: u32, safety_margin: f64) -> Self {
        let effective = (f64::from(calls_per_minute.max(1)) * safety_margin).max(f64::MIN_POSITIVE);
        Self::new(Duration::from_secs_f64(60.0 / effective))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call may be issued, then record it.
    ///
    /// Returns the instant the slot was granted.
    pub async fn acquire(&self) -> Instant {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                debug!(wait_ms = (ready_at - now).as_millis() as u64, "Pacing upstream call");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let granted = Instant::now();
        *last_call = Some(granted);
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_from_quota_applies_margin() {
        let limiter = RateLimiter::from_quota(60, 0.8);
        assert_eq!(limiter.min_interval(), Duration::from_millis(1250));

        let limiter = RateLimiter::from_quota(300, 1.0);
        assert_eq!(limiter.min_interval(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_spaced() {
        let interval = Duration::from_millis(20);
        let limiter = Arc::new(RateLimiter::new(interval));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(
                pair[1] - pair[0] >= interval,
                "calls {:?} apart",
                pair[1] - pair[0]
            );
        }
    }
}
