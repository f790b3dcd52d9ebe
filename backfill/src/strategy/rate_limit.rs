use backfill_core::{RateLimitState, RateLimitStrategy};
use chrono::{DateTime, Utc};

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Calculates a delay with a hard upper limit.
///
/// Time until the refresh date is measured in whole milliseconds, a refresh date less than a
/// millisecond away counts as already refreshed.
///
/// Useful in combination with queues that only allow a bounded delay, SQS for example caps it
/// at 15 minutes.
pub struct CappedDelayRateLimitStrategy {
    max_delay_seconds: f64,
    now: Clock,
}

impl CappedDelayRateLimitStrategy {
    /// Creates a new strategy reading the system clock.
    #[inline]
    pub fn new(max_delay_seconds: f64) -> Self {
        Self::with_clock(max_delay_seconds, Utc::now)
    }

    /// Creates a new strategy with an injected time source.
    pub fn with_clock<F>(max_delay_seconds: f64, now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            max_delay_seconds,
            now: Box::new(now),
        }
    }
}

impl RateLimitStrategy for CappedDelayRateLimitStrategy {
    fn get_delay_in_seconds(&self, rate_limit: Option<&RateLimitState>) -> f64 {
        let Some(rate_limit) = rate_limit else {
            return 0.0;
        };

        if rate_limit.budget_left > 0 {
            return 0.0;
        }

        // a refresh date in the past means the budget has been refreshed already
        let until_refresh = (rate_limit.refresh_date - (self.now)()).num_milliseconds();
        if until_refresh <= 0 {
            return 0.0;
        }

        #[allow(clippy::cast_precision_loss)]
        let delay = until_refresh as f64 / 1000.0;
        delay.min(self.max_delay_seconds).max(0.0)
    }
}
