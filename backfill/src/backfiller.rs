use backfill_core::{
    Delay, DelayReason, JobStore, NextAction, RateLimitState, RateLimitStrategy, Result,
    RetryStrategy, Step, StepError, StepPrioritizer, StepProcessor, StepResult,
};
use metrics::counter;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives a job forward one step per invocation.
///
/// The Backfiller holds no state between calls, everything is read from and written to the
/// [`JobStore`], so a single instance can be shared across concurrently running jobs. Callers must
/// make sure at most one `process_step` runs per job at any time.
pub struct Backfiller<ID, S> {
    prioritizer: Arc<dyn StepPrioritizer<ID, S>>,
    job_store: Arc<dyn JobStore<ID, S>>,
    rate_limit_strategy: Arc<dyn RateLimitStrategy>,
    retry_strategy: Arc<dyn RetryStrategy>,
}

impl<ID, S> Backfiller<ID, S>
where
    ID: Debug + Clone + Send + Sync,
    S: Send + Sync,
{
    pub fn new(
        prioritizer: Arc<dyn StepPrioritizer<ID, S>>,
        job_store: Arc<dyn JobStore<ID, S>>,
        rate_limit_strategy: Arc<dyn RateLimitStrategy>,
        retry_strategy: Arc<dyn RetryStrategy>,
    ) -> Self {
        Self {
            prioritizer,
            job_store,
            rate_limit_strategy,
            retry_strategy,
        }
    }

    /// Processes the next step of the given job.
    ///
    /// Call this again for the same job until the returned action has `schedule_next_step` set
    /// to false. If the action carries a delay, don't call it for the same job before the delay
    /// has passed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if any of the collaborators fails. Nothing is retried in that case, the
    /// caller decides whether to attempt the whole invocation again.
    #[tracing::instrument(name = "process_step", level = "debug", skip_all, fields(job_id = ?step.job_id))]
    pub async fn process_step(&self, step: &Step<ID>) -> Result<NextAction<ID>> {
        let job_id = &step.job_id;
        let current_rate_limit = self.job_store.get_rate_limit_state(job_id).await?;

        if self
            .rate_limit_strategy
            .get_delay_in_seconds(current_rate_limit.as_ref())
            > 0.0
        {
            info!("rate limit hit, delaying step");
            counter!("backfill_step", "outcome" => "rate_limited").increment(1);
            return Ok(self.continue_job_with_rate_limit(step, current_rate_limit.as_ref()));
        }

        let job_state = self.job_store.get_job_state(job_id).await?;
        let Some(processor) = self
            .prioritizer
            .get_step_processor(step, &job_state, current_rate_limit.as_ref())
            .await?
        else {
            info!("nothing left to process, stopping job");
            counter!("backfill_step", "outcome" => "no_processor").increment(1);
            return Ok(self.stop_job(step));
        };

        let result = processor.process(&job_state).await?;

        // an absent rate limit leaves the previous snapshot in place
        if let Some(rate_limit) = &result.rate_limit {
            self.job_store
                .update_rate_limit_state(job_id, rate_limit)
                .await?;
        }

        if result.job_finished {
            info!("job finished");
            counter!("backfill_step", "outcome" => "finished").increment(1);
            return Ok(self.stop_job(step));
        }

        if result.success {
            counter!("backfill_step", "outcome" => "success").increment(1);
            if self.job_store.get_failed_attempts_count(job_id).await? > 0 {
                self.job_store.set_failed_attempts_count(job_id, 0).await?;
            }
            return Ok(self.continue_job_with_rate_limit(step, result.rate_limit.as_ref()));
        }

        match &result.error {
            None | Some(StepError::Retryable { .. }) => {
                self.retry_step(step, processor.as_ref(), &result).await
            }
            Some(StepError::Fatal { message }) => {
                error!(error = %message, "stopping job due to fatal error");
                counter!("backfill_step", "outcome" => "fatal").increment(1);
                Ok(self.stop_job(step))
            }
            Some(StepError::Skippable { message }) => {
                error!(error = %message, "skipping step");
                counter!("backfill_step", "outcome" => "skipped").increment(1);
                processor.skip().await?;
                Ok(self.continue_job_with_rate_limit(step, result.rate_limit.as_ref()))
            }
        }
    }

    /// Retries the step while the retry strategy allows it, otherwise resets the failed attempts
    /// and skips the step.
    async fn retry_step(
        &self,
        step: &Step<ID>,
        processor: &dyn StepProcessor<S>,
        result: &StepResult,
    ) -> Result<NextAction<ID>> {
        let job_id = &step.job_id;
        let message = result.error.as_ref().map_or("", StepError::message);
        let failed_attempts = self.job_store.get_failed_attempts_count(job_id).await?;
        let retry = self.retry_strategy.get_retry(failed_attempts);

        if retry.should_retry {
            warn!(error = %message, failed_attempts, "retrying step");
            counter!("backfill_step", "outcome" => "retry").increment(1);
            self.job_store
                .set_failed_attempts_count(job_id, failed_attempts.saturating_add(1))
                .await?;
            return Ok(self.continue_job_with_delay(
                step,
                retry.retry_after_seconds,
                DelayReason::Retry,
            ));
        }

        warn!(error = %message, failed_attempts, "not retrying step, skipping it");
        counter!("backfill_step", "outcome" => "retries_exhausted").increment(1);
        self.job_store.set_failed_attempts_count(job_id, 0).await?;
        processor.skip().await?;
        Ok(self.continue_job_with_rate_limit(step, result.rate_limit.as_ref()))
    }

    fn continue_job_with_rate_limit(
        &self,
        step: &Step<ID>,
        rate_limit: Option<&RateLimitState>,
    ) -> NextAction<ID> {
        let seconds = self.rate_limit_strategy.get_delay_in_seconds(rate_limit);
        self.continue_job_with_delay(step, Some(seconds), DelayReason::RateLimit)
    }

    fn continue_job_with_delay(
        &self,
        step: &Step<ID>,
        seconds: Option<f64>,
        reason: DelayReason,
    ) -> NextAction<ID> {
        let delay = seconds
            .filter(|seconds| *seconds > 0.0)
            .map(|seconds| Delay { seconds, reason });
        debug!(?delay, "scheduling next step");
        NextAction {
            job_id: step.job_id.clone(),
            schedule_next_step: true,
            delay,
        }
    }

    fn stop_job(&self, step: &Step<ID>) -> NextAction<ID> {
        NextAction {
            job_id: step.job_id.clone(),
            schedule_next_step: false,
            delay: None,
        }
    }
}
