use thiserror::Error;

/// The Backfill Result.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the scheduler and its collaborators.
///
/// These are out-of-band failures. A step that fails in an expected way reports it in-band through
/// [`crate::StepError`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// indicates a strategy was constructed with invalid parameters.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// indicates the job store has no state for the requested job.
    #[error("job with id `{job_id}` not found.")]
    JobNotFound { job_id: String },

    #[error("Job store error: {message}")]
    Store { message: String, is_retryable: bool },

    #[error("Step processor error: {message}")]
    Processor { message: String, is_retryable: bool },
}

impl Error {
    #[inline]
    #[must_use]
    pub fn error_type(&self) -> String {
        match self {
            Error::Config { .. } => "config".to_string(),
            Error::JobNotFound { .. } => "job_not_found".to_string(),
            Error::Store { .. } => "store".to_string(),
            Error::Processor { .. } => "processor".to_string(),
        }
    }

    /// returns if the whole invocation may be attempted again.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Config { .. } | Error::JobNotFound { .. } => false,
            Error::Store { is_retryable, .. } | Error::Processor { is_retryable, .. } => {
                *is_retryable
            }
        }
    }
}
