use crate::{RateLimitState, Result};
use async_trait::async_trait;

/// JobStore is the trait definition for any backfill persistence implementation.
///
/// Every call is expected to be durable and read-after-write consistent for the next call on the
/// same job. Unseen jobs have no rate limit state and zero failed attempts.
#[async_trait]
pub trait JobStore<ID, S>: Send + Sync {
    async fn get_job_state(&self, job_id: &ID) -> Result<S>;
    async fn get_rate_limit_state(&self, job_id: &ID) -> Result<Option<RateLimitState>>;
    async fn update_rate_limit_state(&self, job_id: &ID, state: &RateLimitState) -> Result<()>;
    async fn get_failed_attempts_count(&self, job_id: &ID) -> Result<u32>;
    async fn set_failed_attempts_count(&self, job_id: &ID, count: u32) -> Result<()>;
}
