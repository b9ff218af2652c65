//! Millisecond timestamps.
//!
//! Entry state stores wall-clock milliseconds, with `0` meaning "never".
//! The clock anchors the wall clock once and then advances with Tokio's
//! clock, so a paused test runtime moves staleness and eviction forward
//! only when the test advances time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_ms: u64,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
            // Keep every timestamp distinguishable from the "never" sentinel
            .max(1);
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }

    /// Current time in milliseconds since the Unix epoch.
    pub fn now_ms(&self) -> u64 {
        self.origin_ms
            .saturating_add(self.origin.elapsed().as_millis() as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a duration to whole milliseconds, saturating.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Time left until data updated at `updated_at` becomes stale.
pub fn time_until_stale(updated_at: u64, stale_time: Duration, now: u64) -> Duration {
    let stale_at = updated_at.saturating_add(millis(stale_time));
    Duration::from_millis(stale_at.saturating_sub(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_paused_time() {
        let clock = Clock::new();
        let start = clock.now_ms();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms() - start, 1500);
    }

    #[test]
    fn time_until_stale_saturates() {
        assert_eq!(
            time_until_stale(1000, Duration::from_millis(500), 1200),
            Duration::from_millis(300)
        );
        assert_eq!(time_until_stale(1000, Duration::from_millis(500), 5000), Duration::ZERO);
        assert_eq!(time_until_stale(1000, Duration::ZERO, 1000), Duration::ZERO);
        // Infinite stale time never reaches zero
        assert!(time_until_stale(1000, Duration::MAX, 5000) > Duration::ZERO);
    }

    #[test]
    fn millis_clamps_huge_durations() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
