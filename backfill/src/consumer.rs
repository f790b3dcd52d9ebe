use crate::Backfiller;
use async_channel::{Receiver, Sender};
use backfill_core::{NextAction, Result, Step};
use backoff_rs::{Exponential, ExponentialBackoffBuilder};
use metrics::counter;
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub struct ConsumerBuilder<ID, S> {
    backfiller: Arc<Backfiller<ID, S>>,
    max_workers: usize,
    retry_backoff: Exponential,
    max_retries: Option<usize>,
}

impl<ID, S> ConsumerBuilder<ID, S>
where
    ID: Debug + Clone + Eq + Hash + Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    pub fn new(backfiller: Arc<Backfiller<ID, S>>) -> Self {
        let retry_backoff = ExponentialBackoffBuilder::default()
            .interval(Duration::from_millis(100))
            .jitter(Duration::from_millis(25))
            .max(Duration::from_secs(5))
            .build();

        Self {
            backfiller,
            max_workers: 10,
            retry_backoff,
            max_retries: Some(5),
        }
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Backoff applied when a step invocation fails with a retryable error.
    pub fn retry_backoff(mut self, backoff: Exponential) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Maximum attempts of a failing invocation before the job is dropped, `None` retries forever.
    pub fn max_retries(mut self, max_retries: Option<usize>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Consumer<ID, S> {
        let (tx, rx) = async_channel::unbounded();
        Consumer {
            backfiller: self.backfiller,
            max_workers: self.max_workers,
            retry_backoff: Arc::new(self.retry_backoff),
            max_retries: self.max_retries,
            active: Arc::new(ActiveJobs::default()),
            tx,
            rx,
        }
    }
}

/// Runs jobs to completion by feeding their steps through a `Backfiller`.
///
/// Steps are re-enqueued after the delay the backfiller asks for. At most one step per job is
/// queued or in flight at any time.
pub struct Consumer<ID, S> {
    backfiller: Arc<Backfiller<ID, S>>,
    max_workers: usize,
    retry_backoff: Arc<Exponential>,
    max_retries: Option<usize>,
    active: Arc<ActiveJobs<ID>>,
    tx: Sender<Step<ID>>,
    rx: Receiver<Step<ID>>,
}

impl<ID, S> Consumer<ID, S>
where
    ID: Debug + Clone + Eq + Hash + Send + Sync + 'static,
    S: Send + Sync + 'static,
{
    /// Submits a job for processing.
    ///
    /// Returns `false` without enqueueing anything if the job is already active or the consumer
    /// has been shut down.
    pub fn submit(&self, step: Step<ID>) -> bool {
        if !self.active.insert(step.job_id.clone()) {
            debug!(job_id = ?step.job_id, "job already active, ignoring submission");
            return false;
        }
        if self.tx.try_send(step.clone()).is_err() {
            self.active.remove(&step.job_id);
            return false;
        }
        true
    }

    /// Number of jobs that are queued, waiting on a delay or being processed.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.active.len()
    }

    /// Resolves once no job is active anymore, usable as the `cancel` future of [`Consumer::start`].
    pub fn until_idle(&self) -> impl Future<Output = ()> + Send + 'static {
        let active = Arc::clone(&self.active);
        async move { active.idle().await }
    }

    /// Processes jobs until `cancel` resolves.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a worker task panicked.
    pub async fn start(
        &self,
        cancel: impl Future<Output = ()> + Send + 'static,
    ) -> std::result::Result<(), anyhow::Error> {
        let handles = (0..self.max_workers)
            .map(|_| task::spawn(self.worker()))
            .collect::<Vec<_>>();

        cancel.await;
        info!("shutting down consumer");
        self.rx.close();

        for handle in handles {
            handle.await?;
        }
        Ok(())
    }

    fn worker(&self) -> impl Future<Output = ()> {
        let backfiller = Arc::clone(&self.backfiller);
        let retry_backoff = Arc::clone(&self.retry_backoff);
        let max_retries = self.max_retries;
        let active = Arc::clone(&self.active);
        let tx = self.tx.clone();
        let rx = self.rx.clone();

        async move {
            while let Ok(step) = rx.recv().await {
                match with_retry(&backfiller, &retry_backoff, max_retries, &step).await {
                    Ok(action) => schedule(&tx, &active, step, &action),
                    Err(e) => {
                        counter!("backfill_consumer_errors", "type" => e.error_type())
                            .increment(1);
                        error!(job_id = ?step.job_id, error = %e, "dropping job after failed step");
                        active.remove(&step.job_id);
                    }
                }
            }
        }
    }
}

/// Invokes the backfiller, retrying the whole invocation on retryable errors.
async fn with_retry<ID, S>(
    backfiller: &Backfiller<ID, S>,
    backoff: &Exponential,
    max_retries: Option<usize>,
    step: &Step<ID>,
) -> Result<NextAction<ID>>
where
    ID: Debug + Clone + Send + Sync,
    S: Send + Sync,
{
    let mut attempt = 0;
    loop {
        let result = backfiller.process_step(step).await;
        match result {
            Err(e) if e.is_retryable() => {
                if let Some(max_retries) = max_retries {
                    if attempt >= max_retries {
                        return Err(e);
                    }
                }
                warn!(job_id = ?step.job_id, error = %e, attempt, "retrying step invocation");
                sleep(backoff.duration(attempt)).await;
                attempt += 1;
            }
            _ => return result,
        }
    }
}

fn schedule<ID>(
    tx: &Sender<Step<ID>>,
    active: &Arc<ActiveJobs<ID>>,
    step: Step<ID>,
    action: &NextAction<ID>,
) where
    ID: Debug + Eq + Hash + Send + Sync + 'static,
{
    if !action.schedule_next_step {
        info!(job_id = ?step.job_id, "job done");
        active.remove(&step.job_id);
        return;
    }

    match action.delay_duration() {
        None => {
            if let Err(e) = tx.try_send(step) {
                debug!("queue closed, job will not continue");
                active.remove(&e.into_inner().job_id);
            }
        }
        Some(delay) => {
            let tx = tx.clone();
            let active = Arc::clone(active);
            task::spawn(async move {
                sleep(delay).await;
                if let Err(e) = tx.send(step).await {
                    debug!("queue closed, job will not continue");
                    active.remove(&e.into_inner().job_id);
                }
            });
        }
    }
}

/// Jobs that are queued, waiting on a delay or being processed.
struct ActiveJobs<ID> {
    jobs: Mutex<HashSet<ID>>,
    idle: Notify,
}

impl<ID> Default for ActiveJobs<ID> {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(HashSet::new()),
            idle: Notify::new(),
        }
    }
}

impl<ID> ActiveJobs<ID>
where
    ID: Eq + Hash,
{
    fn insert(&self, job_id: ID) -> bool {
        lock(&self.jobs).insert(job_id)
    }

    fn remove(&self, job_id: &ID) {
        let mut jobs = lock(&self.jobs);
        if jobs.remove(job_id) && jobs.is_empty() {
            self.idle.notify_waiters();
        }
    }

    fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    async fn idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // registered before checking so a removal in between is not missed
            notified.as_mut().enable();
            let idle = lock(&self.jobs).is_empty();
            if idle {
                return;
            }
            notified.await;
        }
    }
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
