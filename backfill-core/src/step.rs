use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Step identifies the job whose next unit of work should be processed.
///
/// A Step does not hold any information about what to do exactly, that is derived from the job
/// state by the step processor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Step<ID> {
    /// The Job ID this step belongs to.
    pub job_id: ID,
}

impl<ID> Step<ID> {
    #[inline]
    pub fn new(job_id: ID) -> Self {
        Self { job_id }
    }
}

/// A snapshot of an external rate limit budget.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitState {
    /// The budget that is left. Zero or less means the rate limit is hit.
    pub budget_left: i64,

    /// The time at which the budget will refresh.
    pub refresh_date: DateTime<Utc>,
}

/// In-band failure of a single step.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// The step is expected to work when attempted again.
    Retryable { message: String },

    /// The whole job is unrecoverable and must stop.
    Fatal { message: String },

    /// The current unit of work is permanently broken and should be skipped.
    Skippable { message: String },
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn skippable(message: impl Into<String>) -> Self {
        Self::Skippable {
            message: message.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message } | Self::Fatal { message } | Self::Skippable { message } => {
                message
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// The outcome of processing one step.
///
/// `job_finished` terminates the job regardless of the other fields. A failed step without an
/// `error` is treated as retryable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StepResult {
    /// True if the processing step was successful.
    pub success: bool,

    /// True if this was the last step of the job.
    pub job_finished: bool,

    /// The state of the rate limit after processing the step.
    #[serde(default)]
    pub rate_limit: Option<RateLimitState>,

    /// Information about the error, if processing was not successful.
    #[serde(default)]
    pub error: Option<StepError>,
}

impl StepResult {
    pub fn success(rate_limit: Option<RateLimitState>) -> Self {
        Self {
            success: true,
            job_finished: false,
            rate_limit,
            error: None,
        }
    }

    pub fn finished(rate_limit: Option<RateLimitState>) -> Self {
        Self {
            success: true,
            job_finished: true,
            rate_limit,
            error: None,
        }
    }

    pub fn failed(error: StepError, rate_limit: Option<RateLimitState>) -> Self {
        Self {
            success: false,
            job_finished: false,
            rate_limit,
            error: Some(error),
        }
    }
}

/// Decision of a retry strategy for a given number of failed attempts.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Retry {
    pub should_retry: bool,

    /// Only meaningful when `should_retry` is true.
    pub retry_after_seconds: Option<f64>,
}

/// Why the next step of a job is delayed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DelayReason {
    Retry,
    RateLimit,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Delay {
    pub seconds: f64,
    pub reason: DelayReason,
}

/// Information about the next action that should be taken after a step has been processed.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NextAction<ID> {
    /// The Job ID the action applies to.
    pub job_id: ID,

    /// If true the job isn't finished yet and the same step should be submitted again. If false
    /// the job is done and must not be re-enqueued.
    pub schedule_next_step: bool,

    /// If set, the next step must not run before this delay has passed. Absent means as soon as
    /// possible.
    #[serde(default)]
    pub delay: Option<Delay>,
}

impl<ID> NextAction<ID> {
    #[inline]
    #[must_use]
    pub fn delay_in_seconds(&self) -> Option<f64> {
        self.delay.map(|d| d.seconds)
    }

    /// The delay as a `Duration`, `None` when the next step may run immediately.
    ///
    /// Delays too large for a `Duration` saturate at `Duration::MAX`.
    #[inline]
    #[must_use]
    pub fn delay_duration(&self) -> Option<Duration> {
        self.delay
            .filter(|d| d.seconds > 0.0)
            .map(|d| Duration::try_from_secs_f64(d.seconds).unwrap_or(Duration::MAX))
    }
}
