mod rate_limit;
mod retry;

pub use rate_limit::CappedDelayRateLimitStrategy;
pub use retry::BackoffRetryStrategy;
