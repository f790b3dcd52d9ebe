use crate::{RateLimitState, Retry};

/// Decides how long to wait before the next step so the rate limit isn't triggered.
pub trait RateLimitStrategy: Send + Sync {
    /// Returns the delay in seconds, never negative.
    fn get_delay_in_seconds(&self, rate_limit: Option<&RateLimitState>) -> f64;
}

/// Decides whether a failing step should be attempted again and after how long.
pub trait RetryStrategy: Send + Sync {
    fn get_retry(&self, failed_attempts: u32) -> Retry;
}
