use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Paces callers to at most `per_sec` acquisitions per second.
///
/// Must be created from within a tokio runtime. Unlike a refill task, the
/// ticker lives inside the limiter and goes away with it.
pub struct RateLimiter {
    ticker: Mutex<Interval>,
}

impl RateLimiter {
    pub fn new(per_sec: u32) -> Self {
        let period = Duration::from_micros(1_000_000 / u64::from(per_sec.max(1)));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        RateLimiter { ticker: Mutex::new(ticker) }
    }

    /// `None` when pacing is disabled (`per_sec == 0`).
    pub fn optional(per_sec: u32) -> Option<Self> {
        if per_sec == 0 { None } else { Some(Self::new(per_sec)) }
    }

    pub async fn acquire(&self) {
        self.ticker.lock().await.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_acquisitions() {
        let rl = RateLimiter::new(10);
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            rl.acquire().await;
        }
        // first tick is immediate, the remaining four are 100ms apart
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[test]
    fn zero_disables_pacing() {
        assert!(RateLimiter::optional(0).is_none());
    }
}
