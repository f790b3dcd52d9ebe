mod errors;
mod processor;
mod step;
mod store;
mod strategy;

pub use errors::{Error, Result};
pub use processor::{StepPrioritizer, StepProcessor};
pub use step::{Delay, DelayReason, NextAction, RateLimitState, Retry, Step, StepError, StepResult};
pub use store::JobStore;
pub use strategy::{RateLimitStrategy, RetryStrategy};
