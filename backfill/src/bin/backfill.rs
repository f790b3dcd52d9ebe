use async_trait::async_trait;
use backfill::strategy::{BackoffRetryStrategy, CappedDelayRateLimitStrategy};
use backfill::{Backfiller, ConsumerBuilder, MemoryJobStore};
use backfill_core::{
    JobStore, RateLimitState, Result, Step, StepError, StepPrioritizer, StepProcessor, StepResult,
};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[clap(version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"), about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Opts {
    /// Upper limit, in seconds, of any rate limit delay.
    #[clap(long, default_value = "900", env = "MAX_DELAY_SECONDS")]
    pub max_delay_seconds: f64,

    /// Number of retries of a failing step before it is skipped.
    #[clap(long, default_value = "3", env = "RETRIES")]
    pub retries: i64,

    /// Delay, in seconds, before the first retry.
    #[clap(long, default_value = "2", env = "INITIAL_DELAY_SECONDS")]
    pub initial_delay_seconds: f64,

    /// Factor the retry delay grows by with every failed attempt.
    #[clap(long, default_value = "2", env = "BACKOFF_MULTIPLIER")]
    pub backoff_multiplier: f64,

    /// Optional upper limit, in seconds, of the retry delay.
    #[clap(long, env = "MAX_RETRY_DELAY_SECONDS")]
    pub max_retry_delay_seconds: Option<f64>,

    /// Number of jobs processed concurrently.
    #[clap(long, default_value = "10", env = "WORKERS")]
    pub workers: usize,

    /// Number of simulated jobs.
    #[clap(long, default_value = "3", env = "JOBS")]
    pub jobs: usize,

    /// Number of items every simulated job works through.
    #[clap(long, default_value = "20", env = "ITEMS_PER_JOB")]
    pub items_per_job: u32,

    /// Items that always fail with a retryable error and end up skipped.
    #[clap(long, value_delimiter = ',', env = "FAILING_ITEMS")]
    pub failing_items: Vec<u32>,

    /// Requests allowed per rate limit window.
    #[clap(long, default_value = "5", env = "RATE_LIMIT_BUDGET")]
    pub rate_limit_budget: i64,

    /// Length, in seconds, of a rate limit window.
    #[clap(long, default_value = "2", env = "RATE_LIMIT_WINDOW_SECONDS")]
    pub rate_limit_window_seconds: i64,
}

#[derive(Debug, Clone, Default)]
struct SimulatedJob {
    cursor: u32,
    processed: u32,
    skipped: u32,
}

#[derive(Debug, Serialize)]
struct JobSummary {
    job_id: String,
    processed: u32,
    skipped: u32,
}

/// Works through `items` items against a simulated rate limited API.
struct SimulatedProcessor {
    store: Arc<MemoryJobStore<String, SimulatedJob>>,
    job_id: String,
    items: u32,
    failing_items: Arc<Vec<u32>>,
    budget: i64,
    window: chrono::Duration,
}

#[async_trait]
impl StepProcessor<SimulatedJob> for SimulatedProcessor {
    async fn process(&self, job_state: &SimulatedJob) -> Result<StepResult> {
        let now = Utc::now();
        let mut rate_limit = match self.store.get_rate_limit_state(&self.job_id).await? {
            Some(rate_limit) if rate_limit.refresh_date > now => rate_limit,
            _ => RateLimitState {
                budget_left: self.budget,
                refresh_date: now + self.window,
            },
        };
        rate_limit.budget_left -= 1;

        if job_state.cursor >= self.items {
            return Ok(StepResult::finished(Some(rate_limit)));
        }
        if self.failing_items.contains(&job_state.cursor) {
            return Ok(StepResult::failed(
                StepError::retryable(format!("item {} unavailable", job_state.cursor)),
                Some(rate_limit),
            ));
        }

        self.store.update_job_state(&self.job_id, |state| {
            state.cursor += 1;
            state.processed += 1;
        })?;
        Ok(StepResult::success(Some(rate_limit)))
    }

    async fn skip(&self) -> Result<()> {
        self.store.update_job_state(&self.job_id, |state| {
            state.cursor += 1;
            state.skipped += 1;
        })
    }
}

struct SimulatedPrioritizer {
    store: Arc<MemoryJobStore<String, SimulatedJob>>,
    opts: Arc<Opts>,
    failing_items: Arc<Vec<u32>>,
}

#[async_trait]
impl StepPrioritizer<String, SimulatedJob> for SimulatedPrioritizer {
    async fn get_step_processor(
        &self,
        step: &Step<String>,
        _job_state: &SimulatedJob,
        _rate_limit: Option<&RateLimitState>,
    ) -> Result<Option<Arc<dyn StepProcessor<SimulatedJob>>>> {
        let processor: Arc<dyn StepProcessor<SimulatedJob>> = Arc::new(SimulatedProcessor {
            store: Arc::clone(&self.store),
            job_id: step.job_id.clone(),
            items: self.opts.items_per_job,
            failing_items: Arc::clone(&self.failing_items),
            budget: self.opts.rate_limit_budget,
            window: chrono::Duration::seconds(self.opts.rate_limit_window_seconds),
        });
        Ok(Some(processor))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match env::var("RUST_LOG") {
        Err(_) => env::set_var("RUST_LOG", "info"),
        Ok(v) => {
            if v.trim() == "" {
                env::set_var("RUST_LOG", "info");
            }
        }
    };

    // install global collector configured based on RUST_LOG env var.
    tracing_subscriber::fmt::init();

    info!("Starting backfill version {}", VERSION);

    let opts = Arc::new(Opts::parse());

    let mut retry_strategy = BackoffRetryStrategy::new(
        opts.retries,
        opts.initial_delay_seconds,
        opts.backoff_multiplier,
    )?;
    if let Some(max) = opts.max_retry_delay_seconds {
        retry_strategy = retry_strategy.with_max_delay(max)?;
    }

    let store = Arc::new(MemoryJobStore::new());
    let backfiller = Backfiller::new(
        Arc::new(SimulatedPrioritizer {
            store: Arc::clone(&store),
            opts: Arc::clone(&opts),
            failing_items: Arc::new(opts.failing_items.clone()),
        }),
        store.clone(),
        Arc::new(CappedDelayRateLimitStrategy::new(opts.max_delay_seconds)),
        Arc::new(retry_strategy),
    );

    let consumer = ConsumerBuilder::new(Arc::new(backfiller))
        .max_workers(opts.workers)
        .build();

    let job_ids = (0..opts.jobs)
        .map(|_| Uuid::new_v4().to_string())
        .collect::<Vec<_>>();
    for job_id in &job_ids {
        store.insert(job_id.clone(), SimulatedJob::default());
        consumer.submit(Step::new(job_id.clone()));
    }

    consumer.start(consumer.until_idle()).await?;

    let mut summary = Vec::with_capacity(job_ids.len());
    for job_id in job_ids {
        let state = store.get_job_state(&job_id).await?;
        summary.push(JobSummary {
            job_id,
            processed: state.processed,
            skipped: state.skipped,
        });
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
