use async_trait::async_trait;
use backfill_core::{Error, JobStore, RateLimitState, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Inner<ID, S> {
    job_states: HashMap<ID, S>,
    rate_limits: HashMap<ID, RateLimitState>,
    failed_attempts: HashMap<ID, u32>,
}

/// In-memory job store.
///
/// Nothing survives a restart, which makes it suitable for tests and single process runs only.
pub struct MemoryJobStore<ID, S> {
    inner: Mutex<Inner<ID, S>>,
}

impl<ID, S> Default for MemoryJobStore<ID, S> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                job_states: HashMap::new(),
                rate_limits: HashMap::new(),
                failed_attempts: HashMap::new(),
            }),
        }
    }
}

impl<ID, S> MemoryJobStore<ID, S>
where
    ID: Debug + Eq + Hash,
{
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job, replacing any state stored for the same ID.
    pub fn insert(&self, job_id: ID, job_state: S) {
        self.lock().job_states.insert(job_id, job_state);
    }

    #[inline]
    pub fn set_job_state(&self, job_id: ID, job_state: S) {
        self.insert(job_id, job_state);
    }

    /// Modifies the state of an existing job in place.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the job does not exist.
    pub fn update_job_state<F>(&self, job_id: &ID, f: F) -> Result<()>
    where
        F: FnOnce(&mut S),
    {
        let mut inner = self.lock();
        let state = inner
            .job_states
            .get_mut(job_id)
            .ok_or_else(|| not_found(job_id))?;
        f(state);
        Ok(())
    }

    pub fn set_rate_limit_state(&self, job_id: ID, state: RateLimitState) {
        self.lock().rate_limits.insert(job_id, state);
    }

    /// Removes everything stored for the job, returning its state.
    pub fn remove(&self, job_id: &ID) -> Option<S> {
        let mut inner = self.lock();
        inner.rate_limits.remove(job_id);
        inner.failed_attempts.remove(job_id);
        inner.job_states.remove(job_id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().job_states.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner<ID, S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<ID, S> JobStore<ID, S> for MemoryJobStore<ID, S>
where
    ID: Debug + Eq + Hash + Clone + Send + Sync,
    S: Clone + Send + Sync,
{
    async fn get_job_state(&self, job_id: &ID) -> Result<S> {
        self.lock()
            .job_states
            .get(job_id)
            .cloned()
            .ok_or_else(|| not_found(job_id))
    }

    async fn get_rate_limit_state(&self, job_id: &ID) -> Result<Option<RateLimitState>> {
        Ok(self.lock().rate_limits.get(job_id).cloned())
    }

    async fn update_rate_limit_state(&self, job_id: &ID, state: &RateLimitState) -> Result<()> {
        self.lock()
            .rate_limits
            .insert(job_id.clone(), state.clone());
        Ok(())
    }

    async fn get_failed_attempts_count(&self, job_id: &ID) -> Result<u32> {
        Ok(self
            .lock()
            .failed_attempts
            .get(job_id)
            .copied()
            .unwrap_or_default())
    }

    async fn set_failed_attempts_count(&self, job_id: &ID, count: u32) -> Result<()> {
        self.lock().failed_attempts.insert(job_id.clone(), count);
        Ok(())
    }
}

#[inline]
fn not_found<ID: Debug>(job_id: &ID) -> Error {
    Error::JobNotFound {
        job_id: format!("{job_id:?}"),
    }
}
