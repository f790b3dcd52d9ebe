//! # backfill
//!
//! Drives long running, resumable backfill jobs forward one bounded step at a time while
//! respecting an external rate limit and retrying transient failures with backoff.
//!
//! [`Backfiller::process_step`] decides for a single invocation whether a step runs and what
//! should happen next. It never sleeps, the returned [`NextAction`] tells the caller whether and
//! when to submit the job again. [`Consumer`] is such a caller, backed by an in-process queue.
//!
//! [`NextAction`]: backfill_core::NextAction
//!
mod backfiller;
mod consumer;
mod memory_store;
pub mod strategy;

pub use backfiller::Backfiller;
pub use consumer::{Consumer, ConsumerBuilder};
pub use memory_store::MemoryJobStore;
