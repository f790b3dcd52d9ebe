use crate::{RateLimitState, Result, Step, StepResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Processes a single step of a job.
///
/// In practice a processor loads data from a data source, transforms it and sends it to a data
/// sink, advancing the cursor in its job state through its own persistence.
#[async_trait]
pub trait StepProcessor<S>: Send + Sync {
    /// Processes the next unit of work, using the job state to decide what exactly to do.
    async fn process(&self, job_state: &S) -> Result<StepResult>;

    /// Called when the current unit of work failed and must not be retried. Implementations must
    /// move their cursor past it so the next step doesn't fail the same way again.
    async fn skip(&self) -> Result<()>;
}

/// Decides which processor handles the next step of a job.
#[async_trait]
pub trait StepPrioritizer<ID, S>: Send + Sync {
    /// Returns the processor for the step, or `None` when there is nothing left to do.
    ///
    /// A job made up of several item types can use this to prioritise between them, by recency
    /// or by the state of the rate limit.
    async fn get_step_processor(
        &self,
        step: &Step<ID>,
        job_state: &S,
        rate_limit: Option<&RateLimitState>,
    ) -> Result<Option<Arc<dyn StepProcessor<S>>>>;
}
