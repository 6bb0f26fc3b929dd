// ── Publish rate gate ──
//
// A single periodic ticker shared by every publish entry point. Waiters
// queue on a FIFO mutex and each consumes its own tick. Ticks missed
// while idle are not accumulated, so an idle period never releases a
// burst.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

/// Default spacing between two publishes.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct RateGate {
    period: Duration,
    // Created on first use so construction does not need a runtime.
    ticker: Mutex<Option<Interval>>,
}

impl RateGate {
    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            DEFAULT_PUBLISH_INTERVAL
        } else {
            period
        };
        Self {
            period,
            ticker: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick. The first tick is immediate.
    ///
    /// Cancel safe: dropping the future before it resolves consumes nothing.
    pub async fn acquire(&self) {
        let mut ticker = self.ticker.lock().await;
        let ticker = ticker.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        ticker.tick().await;
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_are_spaced_by_period() {
        let gate = RateGate::new(Duration::from_secs(2));
        let start = Instant::now();

        for _ in 0..4 {
            gate.acquire().await;
        }

        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_get_distinct_ticks() {
        let gate = Arc::new(RateGate::new(Duration::from_secs(1)));
        let start = Instant::now();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut released = Vec::new();
        for waiter in waiters {
            released.push(waiter.await.expect("waiter panicked"));
        }
        released.sort();

        assert!(released[1] - released[0] >= Duration::from_secs(1));
        assert!(released[2] - released[1] >= Duration::from_secs(1));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_does_not_release_a_burst() {
        let gate = RateGate::new(Duration::from_secs(2));
        gate.acquire().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        let resumed = Instant::now();
        gate.acquire().await;
        gate.acquire().await;

        assert!(resumed.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn zero_period_falls_back_to_default() {
        assert_eq!(RateGate::new(Duration::ZERO).period(), DEFAULT_PUBLISH_INTERVAL);
    }
}
